//! One-shot cancellable timers
//!
//! A [`Timer`] sleeps on the tokio clock and then runs its task once.
//! Cancelling only affects a timer that has not fired yet, so a firing task
//! may safely re-arm the [`TimerSlot`] it came from.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct Timer {
    deadline: Instant,
    token: CancellationToken,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Timer {
    /// Spawn a timer running `task` after `delay`.
    pub fn after<F, Fut>(delay: Duration, task: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn({
            let token = token.clone();
            let fired = Arc::clone(&fired);
            async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {
                        fired.store(true, Ordering::SeqCst);
                        task().await;
                    }
                }
            }
        });

        Self {
            deadline,
            token,
            fired,
            handle,
        }
    }

    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancel the timer if it has not fired yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Armed: neither fired nor cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }

    /// Wait for the timer task to finish (fired and ran, or cancelled).
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Holds at most one armed timer; arming replaces and cancels the previous one.
#[derive(Default)]
pub struct TimerSlot {
    current: Mutex<Option<Timer>>,
}

impl TimerSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<F, Fut>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let timer = Timer::after(delay, task);
        if let Some(previous) = self.current.lock().replace(timer) {
            previous.cancel();
        }
    }

    pub fn cancel(&self) {
        if let Some(timer) = self.current.lock().take() {
            timer.cancel();
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.current.lock().as_ref().is_some_and(Timer::is_pending)
    }

    /// Deadline of the pending timer, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.current
            .lock()
            .as_ref()
            .filter(|timer| timer.is_pending())
            .map(Timer::deadline)
    }
}
