//! Per-recording capture loop

use iptvproxy_manifest::{first_variant_uri, VodSegment};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::SegmentCache;
use crate::models::{NewSegment, Recording};
use crate::provider::{ClientIdentity, PlaylistRequest, Protocol, Provider, StreamRequest};
use crate::repository::SegmentRepository;
use crate::Result;

/// Poll interval while the upstream lists no segments
const EMPTY_MANIFEST_POLL: Duration = Duration::from_secs(1);

/// Why a worker left its capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop timer fired at `stop_utc`
    Ended,
    /// Stopped through the recordings API
    Cancelled,
    /// The process is shutting down; the recording stays LIVE and resumes on restart
    Shutdown,
    /// The upstream playlist or chunks manifest could not be downloaded
    Failed,
}

pub type StopSignal = watch::Sender<Option<StopReason>>;

/// Record the first stop reason; later ones are ignored.
pub fn signal_stop(signal: &StopSignal, reason: StopReason) {
    signal.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(reason);
            true
        } else {
            false
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub reason: StopReason,
    pub captured: usize,
}

/// Where each iteration gets its chunks manifest from
enum ChunksSource {
    /// Variant of the master playlist, replayed as a chunks request
    Variant(StreamRequest),
    /// The channel playlist already is a media playlist
    Playlist(PlaylistRequest),
}

/// Segment file name: last path component of the URI, without its query.
pub(crate) fn segment_file_name(uri: &str) -> &str {
    let path = uri.split_once('?').map_or(uri, |(path, _)| path);
    path.rsplit('/').next().unwrap_or(path)
}

fn query_params(uri: &str) -> HashMap<String, String> {
    uri.split_once('?')
        .map(|(_, query)| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

pub struct RecordingWorker {
    recording: Recording,
    provider: Arc<dyn Provider>,
    cache: SegmentCache,
    segments: SegmentRepository,
    directory: PathBuf,
    stop: watch::Receiver<Option<StopReason>>,
    /// Names already stored for this recording
    captured: HashSet<String>,
}

impl RecordingWorker {
    pub fn new(
        recording: Recording,
        provider: Arc<dyn Provider>,
        cache: SegmentCache,
        segments: SegmentRepository,
        directory: PathBuf,
        stop: watch::Receiver<Option<StopReason>>,
    ) -> Self {
        Self {
            recording,
            provider,
            cache,
            segments,
            directory,
            stop,
            captured: HashSet::new(),
        }
    }

    /// Seed the history with segments stored before a restart.
    #[must_use]
    pub fn with_history(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.captured.extend(names);
        self
    }

    fn client(&self) -> ClientIdentity {
        ClientIdentity {
            client_uuid: self.recording.id.to_string(),
            http_token: None,
        }
    }

    fn stop_reason(&self) -> Option<StopReason> {
        *self.stop.borrow()
    }

    /// Resolves once a stop reason has been signalled.
    async fn stopped(&self) -> StopReason {
        let mut stop = self.stop.clone();
        let reason = match stop.wait_for(Option::is_some).await {
            Ok(reason) => reason.unwrap_or(StopReason::Shutdown),
            // Sender dropped: the recorder is gone.
            Err(_) => StopReason::Shutdown,
        };
        reason
    }

    pub async fn run(mut self) -> WorkerOutcome {
        info!(
            "Starting recording {} of {} on {} channel {:02} until {}",
            self.recording.id,
            self.recording.program_title,
            self.recording.provider,
            self.recording.channel_number,
            self.recording.stop_utc
        );

        let before = self.captured.len();
        let reason = self.capture().await;
        let outcome = WorkerOutcome {
            reason,
            captured: self.captured.len() - before,
        };

        info!(
            "Finished recording {} ({:?}, {} new segments)",
            self.recording.id, outcome.reason, outcome.captured
        );
        outcome
    }

    async fn capture(&mut self) -> StopReason {
        if let Err(e) = tokio::fs::create_dir_all(&self.directory).await {
            error!("Failed to create {}: {}", self.directory.display(), e);
            return StopReason::Failed;
        }

        let source = tokio::select! {
            reason = self.stopped() => return reason,
            source = self.resolve_source() => source,
        };
        let source = match source {
            Ok(source) => source,
            Err(e) => {
                error!("Cancelling recording {}: playlist unavailable: {}", self.recording.id, e);
                return StopReason::Failed;
            }
        };

        loop {
            if let Some(reason) = self.stop_reason() {
                return reason;
            }

            let started = Instant::now();
            let manifest = tokio::select! {
                reason = self.stopped() => return reason,
                manifest = self.download_chunks(&source) => manifest,
            };
            let manifest = match manifest {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!("Cancelling recording {}: chunks unavailable: {}", self.recording.id, e);
                    return StopReason::Failed;
                }
            };

            let playlist = match m3u8_rs::parse_media_playlist_res(manifest.as_bytes()) {
                Ok(playlist) => playlist,
                Err(e) => {
                    warn!("Unparsable chunks manifest for recording {}: {}", self.recording.id, e);
                    m3u8_rs::MediaPlaylist::default()
                }
            };

            let mut total = 0.0_f32;
            for segment in &playlist.segments {
                total += segment.duration;
                let name = segment_file_name(&segment.uri).to_string();
                if self.captured.contains(&name) {
                    debug!("Skipping already captured segment {}", name);
                    continue;
                }

                // A stop lets the segment in flight finish writing.
                if let Some(reason) = self.stop_reason() {
                    return reason;
                }
                let stored = self
                    .store_segment(&name, &segment.uri, segment.duration, segment.title.as_deref())
                    .await;
                match stored {
                    Ok(()) => {
                        self.captured.insert(name);
                    }
                    Err(e) => warn!("Failed to capture segment {} of {}: {}", name, self.recording.id, e),
                }
            }

            let poll = if playlist.segments.is_empty() {
                EMPTY_MANIFEST_POLL
            } else {
                Duration::try_from_secs_f32(total).unwrap_or_default()
            };
            let wait = poll.saturating_sub(started.elapsed());
            if !wait.is_zero() {
                tokio::select! {
                    reason = self.stopped() => return reason,
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    async fn resolve_source(&self) -> Result<ChunksSource> {
        let request = PlaylistRequest {
            channel_number: self.recording.channel_number,
            protocol: Protocol::Hls,
            client: self.client(),
        };
        let playlist = self.provider.download_playlist(&request).await?;

        Ok(match first_variant_uri(&playlist)? {
            Some(uri) => ChunksSource::Variant(StreamRequest {
                channel_number: self.recording.channel_number,
                client: self.client(),
                params: query_params(&uri),
            }),
            None => ChunksSource::Playlist(request),
        })
    }

    async fn download_chunks(&self, source: &ChunksSource) -> Result<String> {
        Ok(match source {
            ChunksSource::Variant(request) => self.provider.download_chunks(request).await?,
            ChunksSource::Playlist(request) => self.provider.download_playlist(request).await?,
        })
    }

    async fn store_segment(&self, name: &str, uri: &str, duration: f32, title: Option<&str>) -> Result<()> {
        let request = StreamRequest {
            channel_number: self.recording.channel_number,
            client: self.client(),
            params: query_params(uri),
        };
        let bytes = self
            .cache
            .fetch_through(self.provider.name(), request.channel_number, name, || {
                self.provider.download_ts(name, &request)
            })
            .await?;

        tokio::fs::write(self.directory.join(name), &bytes).await?;
        self.segments
            .insert(&NewSegment {
                name: name.to_string(),
                recording_id: self.recording.id,
                manifest_segment: VodSegment {
                    uri: format!("{name}?recording_id={}", self.recording.id),
                    duration,
                    title: title.filter(|title| !title.is_empty()).map(str::to_string),
                },
                directory_path: self.directory.to_string_lossy().into_owned(),
            })
            .await?;

        debug!("Captured segment {} ({} bytes) for {}", name, bytes.len(), self.recording.id);
        Ok(())
    }
}
