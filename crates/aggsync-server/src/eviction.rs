//! Inactivity eviction for the content store.
//!
//! One deadline covers the whole store. Every successful PUT re-arms it at
//! `now + window`; the background worker clears the store when the deadline
//! passes without being re-armed. Re-arming replaces the pending deadline
//! instead of stacking another timer, so load never accumulates timers.
//!
//! The worker never trusts its own view of the deadline: when its sleep
//! ends it takes the state lock and only purges if the deadline it slept on
//! is still the armed one.

use crate::state::Shared;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// Default inactivity window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Deadline bookkeeping owned by the aggregator state.
#[derive(Debug)]
pub struct EvictionScheduler {
    window: Duration,
    deadline: Option<Instant>,
    notify: watch::Sender<Option<Instant>>,
}

impl EvictionScheduler {
    /// Create a disarmed scheduler and the receiver its worker listens on.
    #[must_use]
    pub fn new(window: Duration) -> (Self, watch::Receiver<Option<Instant>>) {
        let (notify, rx) = watch::channel(None);
        (
            Self {
                window,
                deadline: None,
                notify,
            },
            rx,
        )
    }

    /// Inactivity window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Pending deadline, if armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Arm (or re-arm) the deadline at `now + window`, superseding any
    /// pending one.
    pub fn arm(&mut self, now: Instant) -> Instant {
        let deadline = now + self.window;
        self.deadline = Some(deadline);
        self.notify.send_replace(Some(deadline));
        deadline
    }

    /// Drop the pending deadline without purging.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.notify.send_replace(None);
    }

    /// Called when a timer for `at` has elapsed. Returns `true` if `at` was
    /// still the armed deadline, in which case the scheduler is disarmed and
    /// the caller must purge.
    pub(crate) fn fire(&mut self, at: Instant) -> bool {
        if self.deadline == Some(at) {
            self.cancel();
            true
        } else {
            false
        }
    }
}

/// Background worker that waits on the armed deadline and purges the store.
///
/// Exits once the aggregator state has been dropped.
pub(crate) async fn run_worker(
    shared: Weak<Mutex<Shared>>,
    mut deadlines: watch::Receiver<Option<Instant>>,
) {
    loop {
        let armed = *deadlines.borrow_and_update();

        let Some(at) = armed else {
            if deadlines.changed().await.is_err() {
                break;
            }
            continue;
        };

        tokio::select! {
            changed = deadlines.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = tokio::time::sleep_until(at) => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.lock().await.expire(at);
            }
        }
    }

    tracing::debug!("eviction worker stopped");
}
