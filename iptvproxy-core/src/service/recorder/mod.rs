//! Personal video recorder
//!
//! Recordings move SCHEDULED -> LIVE -> PERSISTED. A single start timer is
//! armed for the earliest SCHEDULED start; every LIVE recording owns a worker
//! task plus a stop timer set for its `stop_utc`.

pub mod vod;
pub mod worker;

pub use vod::VodLibrary;
pub use worker::{RecordingWorker, StopReason, WorkerOutcome};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::SegmentCache;
use crate::models::{Recording, RecordingStatus};
use crate::provider::ProviderRegistry;
use crate::repository::{RecordingRepository, SegmentRepository};
use crate::timer::{Timer, TimerSlot};
use crate::{Error, Result};
use worker::{signal_stop, StopSignal};

/// Recording request from the API
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub provider: String,
    pub channel_number: u32,
    pub program_title: String,
    pub start_utc: DateTime<Utc>,
    pub stop_utc: DateTime<Utc>,
}

/// What `delete` did with a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Rows and files are gone
    Deleted,
    /// A LIVE recording was stopped and kept its captured segments
    Persisted,
}

struct WorkerHandle {
    stop: Arc<StopSignal>,
    stop_timer: Timer,
    task: JoinHandle<()>,
}

fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

pub struct Recorder {
    recordings: RecordingRepository,
    segments: SegmentRepository,
    providers: ProviderRegistry,
    cache: SegmentCache,
    root: PathBuf,
    workers: Mutex<HashMap<Uuid, WorkerHandle>>,
    start_timer: TimerSlot,
    /// Serializes start-timer bookkeeping
    schedule_lock: tokio::sync::Mutex<()>,
    me: Weak<Self>,
}

impl Recorder {
    pub fn new(
        recordings: RecordingRepository,
        segments: SegmentRepository,
        providers: ProviderRegistry,
        cache: SegmentCache,
        root: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let root = root.into();
        Arc::new_cyclic(|me| Self {
            recordings,
            segments,
            providers,
            cache,
            root,
            workers: Mutex::new(HashMap::new()),
            start_timer: TimerSlot::new(),
            schedule_lock: tokio::sync::Mutex::new(()),
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn recording_directory(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    #[must_use]
    pub fn segments_directory(&self, id: Uuid) -> PathBuf {
        self.recording_directory(id).join("segments")
    }

    #[must_use]
    pub fn live_worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    #[must_use]
    pub fn is_recording(&self, id: Uuid) -> bool {
        self.workers.lock().contains_key(&id)
    }

    /// Deadline of the start timer, if armed
    #[must_use]
    pub fn next_start(&self) -> Option<tokio::time::Instant> {
        self.start_timer.deadline()
    }

    /// Prune expired recordings, resume LIVE ones and arm the start timer.
    pub async fn start(&self) -> Result<()> {
        let now = Utc::now();
        let mut pruned = 0;
        let mut resumed = 0;

        for recording in self.recordings.list(None).await? {
            match recording.status {
                RecordingStatus::Scheduled if recording.has_ended(now) => {
                    self.remove_recording(recording.id).await?;
                    pruned += 1;
                }
                RecordingStatus::Live if recording.has_ended(now) => {
                    self.recordings.update_status(recording.id, RecordingStatus::Persisted).await?;
                }
                RecordingStatus::Live => {
                    let history = self
                        .segments
                        .list_for_recording(recording.id)
                        .await?
                        .into_iter()
                        .map(|segment| segment.name);
                    let id = recording.id;
                    match self.spawn_worker(recording, history) {
                        Ok(()) => resumed += 1,
                        Err(e) => warn!("Cannot resume recording {}: {}", id, e),
                    }
                }
                _ => {}
            }
        }

        if pruned > 0 || resumed > 0 {
            info!("Pruned {} expired and resumed {} live recordings", pruned, resumed);
        }

        let _guard = self.schedule_lock.lock().await;
        self.arm_start_timer().await
    }

    pub async fn list(&self, status: Option<RecordingStatus>) -> Result<Vec<Recording>> {
        self.recordings.list(status).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Recording> {
        self.recordings
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Recording {id} not found")))
    }

    /// Schedule a recording. Identical `(provider, channel, start, stop)` yields `AlreadyExists`.
    pub async fn create(&self, request: NewRecording) -> Result<Recording> {
        if request.stop_utc <= request.start_utc {
            return Err(Error::InvalidInput("stop_utc must be after start_utc".to_string()));
        }
        if request.stop_utc <= Utc::now() {
            return Err(Error::InvalidInput("stop_utc must be in the future".to_string()));
        }
        if request.program_title.trim().is_empty() {
            return Err(Error::InvalidInput("program_title must not be empty".to_string()));
        }

        let provider = self.providers.get(&request.provider)?;
        let channel = provider.channel(request.channel_number);
        let recording = Recording::new(
            provider.name(),
            request.channel_number,
            channel.name,
            request.program_title,
            request.start_utc,
            request.stop_utc,
        );

        let _guard = self.schedule_lock.lock().await;
        self.recordings.insert(&recording).await?;
        info!(
            "Scheduled recording {} of {} on {} channel {:02} from {} to {}",
            recording.id,
            recording.program_title,
            recording.provider,
            recording.channel_number,
            recording.start_utc,
            recording.stop_utc
        );
        self.arm_start_timer().await?;

        Ok(recording)
    }

    /// Delete a SCHEDULED or PERSISTED recording, or stop a LIVE one.
    ///
    /// A stopped recording without captured segments is deleted as well.
    pub async fn delete(&self, id: Uuid) -> Result<Removal> {
        let status = match self.get(id).await?.status {
            RecordingStatus::Scheduled => match self.delete_scheduled(id).await? {
                Some(status) => status,
                None => return Ok(Removal::Deleted),
            },
            status => status,
        };

        if status == RecordingStatus::Live {
            self.stop_worker(id, StopReason::Cancelled).await;

            if self.segments.count_for_recording(id).await? == 0 {
                self.remove_recording(id).await?;
                info!("Deleted stopped recording {} without segments", id);
                Ok(Removal::Deleted)
            } else {
                self.recordings.update_status(id, RecordingStatus::Persisted).await?;
                info!("Stopped recording {}", id);
                Ok(Removal::Persisted)
            }
        } else {
            self.remove_recording(id).await?;
            info!("Deleted persisted recording {}", id);
            Ok(Removal::Deleted)
        }
    }

    /// Delete a recording still SCHEDULED once `schedule_lock` is held.
    /// Returns the status it moved on to when the start timer got there first.
    async fn delete_scheduled(&self, id: Uuid) -> Result<Option<RecordingStatus>> {
        let _guard = self.schedule_lock.lock().await;
        let status = self.get(id).await?.status;
        if status != RecordingStatus::Scheduled {
            debug!("Recording {} became {} before it could be deleted", id, status.as_str());
            return Ok(Some(status));
        }

        self.recordings.delete(id).await?;
        info!("Deleted scheduled recording {}", id);
        self.arm_start_timer().await?;
        Ok(None)
    }

    /// Cancel all timers, signal every worker and wait for them to exit.
    pub async fn shutdown(&self) {
        self.start_timer.cancel();

        let handles: Vec<WorkerHandle> = self.workers.lock().drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            handle.stop_timer.cancel();
            signal_stop(&handle.stop, StopReason::Shutdown);
        }

        let count = handles.len();
        futures::future::join_all(handles.into_iter().map(|handle| handle.task)).await;
        if count > 0 {
            info!("Stopped {} recording workers", count);
        }
    }

    async fn remove_recording(&self, id: Uuid) -> Result<()> {
        let directory = self.recording_directory(id);
        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => debug!("Removed {}", directory.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.recordings.delete(id).await?;
        Ok(())
    }

    async fn stop_worker(&self, id: Uuid, reason: StopReason) {
        let handle = self.workers.lock().remove(&id);
        if let Some(handle) = handle {
            handle.stop_timer.cancel();
            signal_stop(&handle.stop, reason);
            if let Err(e) = handle.task.await {
                error!("Recording worker {} panicked: {}", id, e);
            }
        }
    }

    /// Start every due SCHEDULED recording, then re-arm the start timer.
    async fn start_due_recordings(&self) -> Result<()> {
        let _guard = self.schedule_lock.lock().await;
        self.start_due_locked().await
    }

    /// Callers hold `schedule_lock`.
    async fn start_due_locked(&self) -> Result<()> {
        let now = Utc::now();

        for recording in self.recordings.list(Some(RecordingStatus::Scheduled)).await? {
            if !recording.is_due(now) {
                continue;
            }
            if recording.has_ended(now) {
                warn!("Recording {} ended before it could start", recording.id);
                self.remove_recording(recording.id).await?;
                continue;
            }

            let id = recording.id;
            self.recordings.update_status(id, RecordingStatus::Live).await?;
            let recording = Recording {
                status: RecordingStatus::Live,
                ..recording
            };
            if let Err(e) = self.spawn_worker(recording, std::iter::empty()) {
                error!("Cannot start recording {}: {}", id, e);
                self.recordings.update_status(id, RecordingStatus::Persisted).await?;
            }
        }

        self.arm_start_timer().await
    }

    /// Boxed so the start timer's task type does not contain itself.
    fn start_due_task(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.start_due_recordings().await {
                error!("Failed to start due recordings: {}", e);
            }
        })
    }

    /// Arm the start timer for the earliest SCHEDULED start, or disarm it.
    /// Callers hold `schedule_lock`.
    async fn arm_start_timer(&self) -> Result<()> {
        let next = self
            .recordings
            .list(Some(RecordingStatus::Scheduled))
            .await?
            .into_iter()
            .map(|recording| recording.start_utc)
            .min();

        match next {
            Some(start_utc) => {
                let me = self.me.clone();
                let delay = until(start_utc, Utc::now());
                debug!("Next recording starts in {:?}", delay);
                self.start_timer.arm(delay, move || async move {
                    if let Some(recorder) = me.upgrade() {
                        recorder.start_due_task().await;
                    }
                });
            }
            None => self.start_timer.cancel(),
        }
        Ok(())
    }

    fn spawn_worker(&self, recording: Recording, history: impl IntoIterator<Item = String>) -> Result<()> {
        let provider = self.providers.get(&recording.provider)?;
        let id = recording.id;
        let (stop, receiver) = watch::channel(None);
        let stop = Arc::new(stop);

        let stop_timer = Timer::after(until(recording.stop_utc, Utc::now()), {
            let stop = Arc::clone(&stop);
            move || async move {
                signal_stop(&stop, StopReason::Ended);
            }
        });

        let worker = RecordingWorker::new(
            recording,
            provider,
            self.cache.clone(),
            self.segments.clone(),
            self.segments_directory(id),
            receiver,
        )
        .with_history(history);

        let me = self.me.clone();
        let recordings = self.recordings.clone();
        // Held until the handle is registered so a worker that exits at once
        // cannot miss its own removal.
        let mut workers = self.workers.lock();
        let task = tokio::spawn(async move {
            let outcome = worker.run().await;
            if let Some(recorder) = me.upgrade() {
                let handle = recorder.workers.lock().remove(&id);
                if let Some(handle) = handle {
                    handle.stop_timer.cancel();
                }
            }
            if outcome.reason != StopReason::Shutdown {
                if let Err(e) = recordings.update_status(id, RecordingStatus::Persisted).await {
                    error!("Failed to persist recording {}: {}", id, e);
                }
            }
        });

        workers.insert(
            id,
            WorkerHandle {
                stop,
                stop_timer,
                task,
            },
        );
        Ok(())
    }
}
