//! Aggregator shared state.
//!
//! The content store, the eviction deadline and the aggregator's Lamport
//! clock live behind a single mutex. Every request takes that lock exactly
//! once, so a GET never sees half of a concurrent PUT and the clock value
//! returned with a snapshot always matches the data it was taken with.

use crate::eviction::{self, EvictionScheduler};
use aggsync_core::{ClockRule, ContentStore, LamportClock, Reading, Snapshot};
use aggsync_proto::PayloadError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Everything guarded by the aggregator lock.
#[derive(Debug)]
pub(crate) struct Shared {
    clock: LamportClock,
    store: ContentStore,
    eviction: EvictionScheduler,
}

impl Shared {
    /// Purge the store if `at` is still the armed deadline.
    pub(crate) fn expire(&mut self, at: Instant) {
        if self.eviction.fire(at) {
            tracing::info!(
                evicted = self.store.len(),
                window_secs = self.eviction.window().as_secs_f64(),
                "no updates within eviction window, clearing content store"
            );
            self.store.clear();
        }
    }
}

/// Aggregator construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    /// Inactivity window after which the store is cleared
    pub eviction_window: Duration,
    /// Rule used to reconcile received clock values
    pub clock_rule: ClockRule,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            eviction_window: eviction::DEFAULT_WINDOW,
            clock_rule: ClockRule::Lamport,
        }
    }
}

/// Body of a PUT as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutBody {
    /// No body, or `Content-Length: 0`
    Absent,
    /// Body that did not decode as a flat object
    Malformed(PayloadError),
    /// Decoded reading
    Reading(Reading),
}

/// Result of a PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Store was empty before the merge
    Created,
    /// Store already held data
    Updated,
    /// Nothing to merge
    NoContent,
    /// Body rejected; store untouched
    Rejected(PayloadError),
}

/// A value paired with the clock reading taken in the same critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    /// Aggregator clock after the operation
    pub clock: u64,
    /// Operation result
    pub value: T,
}

/// Handle to the aggregator state. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct Aggregator {
    shared: Arc<Mutex<Shared>>,
}

impl Aggregator {
    /// Create the aggregator and start its eviction worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(settings: AggregatorSettings) -> Self {
        let (eviction, deadlines) = EvictionScheduler::new(settings.eviction_window);
        let shared = Arc::new(Mutex::new(Shared {
            clock: LamportClock::with_rule(settings.clock_rule),
            store: ContentStore::new(),
            eviction,
        }));

        tokio::spawn(eviction::run_worker(Arc::downgrade(&shared), deadlines));

        Self { shared }
    }

    /// Serve a GET: tick, reconcile with the caller's clock, snapshot.
    pub async fn get(&self, received: Option<u64>) -> Stamped<Snapshot> {
        let mut shared = self.shared.lock().await;
        shared.clock.tick();
        let clock = shared.clock.observe(received);

        Stamped {
            clock,
            value: shared.store.snapshot(),
        }
    }

    /// Serve a PUT.
    ///
    /// The clock ticks once on arrival and is reconciled with the caller's
    /// value. A non-empty reading is then merged, eviction re-armed, and the
    /// clock ticks again for the reply. A reading with no pairs is answered
    /// like an absent body, so `Created` is seen once per eviction cycle.
    pub async fn put(&self, received: Option<u64>, body: PutBody) -> Stamped<PutOutcome> {
        let mut shared = self.shared.lock().await;
        shared.clock.tick();
        let clock = shared.clock.observe(received);

        let reading = match body {
            PutBody::Absent => {
                return Stamped {
                    clock,
                    value: PutOutcome::NoContent,
                }
            }
            PutBody::Reading(reading) if reading.is_empty() => {
                tracing::debug!("PUT carried no pairs");
                return Stamped {
                    clock,
                    value: PutOutcome::NoContent,
                }
            }
            PutBody::Malformed(err) => {
                return Stamped {
                    clock,
                    value: PutOutcome::Rejected(err),
                }
            }
            PutBody::Reading(reading) => reading,
        };

        let was_empty = shared.store.merge(reading);
        shared.eviction.arm(Instant::now());
        let clock = shared.clock.tick();

        Stamped {
            clock,
            value: if was_empty {
                PutOutcome::Created
            } else {
                PutOutcome::Updated
            },
        }
    }

    /// Current clock value without advancing it.
    pub async fn clock(&self) -> u64 {
        self.shared.lock().await.clock.snapshot()
    }

    /// Current store contents without touching the clock.
    pub async fn snapshot(&self) -> Snapshot {
        self.shared.lock().await.store.snapshot()
    }

    /// Pending eviction deadline, if any.
    pub async fn eviction_deadline(&self) -> Option<Instant> {
        self.shared.lock().await.eviction.deadline()
    }
}
