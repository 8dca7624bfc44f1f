//! Lamport logical clock shared by every AggSync participant.
//!
//! Each process owns one clock. It ticks before sending or locally handling
//! a request or response, and reconciles with the counter carried in the
//! `Lamport-Clock` header of every frame it receives.
//!
//! # References
//!
//! Lamport, L. "Time, Clocks, and the Ordering of Events in a Distributed
//! System" (1978)

use std::fmt;
use std::str::FromStr;

/// How a received counter is folded into the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockRule {
    /// Canonical rule: `local = max(local, received) + 1`.
    #[default]
    Lamport,
    /// Legacy rule: `local = local + received + 1`.
    ///
    /// Kept for peers that compare raw counter values with older
    /// deployments. Grows much faster than necessary.
    Additive,
}

impl ClockRule {
    /// Combine a local and a received counter according to this rule.
    #[must_use]
    pub fn combine(self, local: u64, received: u64) -> u64 {
        match self {
            ClockRule::Lamport => local.max(received).saturating_add(1),
            ClockRule::Additive => local.saturating_add(received).saturating_add(1),
        }
    }
}

impl fmt::Display for ClockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockRule::Lamport => write!(f, "lamport"),
            ClockRule::Additive => write!(f, "additive"),
        }
    }
}

impl FromStr for ClockRule {
    type Err = ParseClockRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lamport" | "max" => Ok(ClockRule::Lamport),
            "additive" | "legacy" => Ok(ClockRule::Additive),
            other => Err(ParseClockRuleError(other.to_string())),
        }
    }
}

/// Error returned when a clock rule name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown clock rule '{0}' (expected 'lamport' or 'additive')")]
pub struct ParseClockRuleError(pub String);

/// Lamport clock state machine.
///
/// Mutation goes through `&mut self`, so concurrent use requires the owner
/// to serialize access (the aggregator keeps its clock behind the same lock
/// as the content store).
#[derive(Debug, Clone, Default)]
pub struct LamportClock {
    counter: u64,
    rule: ClockRule,
}

impl LamportClock {
    /// Create a clock at zero using the canonical rule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock at zero using the given reconciliation rule.
    #[must_use]
    pub fn with_rule(rule: ClockRule) -> Self {
        Self { counter: 0, rule }
    }

    /// Create a clock that resumes from `counter`.
    #[must_use]
    pub fn starting_at(counter: u64, rule: ClockRule) -> Self {
        Self { counter, rule }
    }

    /// The reconciliation rule this clock was built with.
    #[must_use]
    pub fn rule(&self) -> ClockRule {
        self.rule
    }

    /// Advance the clock for a local event and return the new value.
    pub fn tick(&mut self) -> u64 {
        self.counter = self.counter.saturating_add(1);
        self.counter
    }

    /// Update the clock upon receiving a peer's counter.
    ///
    /// Afterwards the local counter is strictly greater than both its
    /// previous value and `received` (until saturation at `u64::MAX`).
    pub fn reconcile(&mut self, received: u64) -> u64 {
        let before = self.counter;
        self.counter = self.rule.combine(before, received);
        tracing::trace!(before, received, after = self.counter, rule = %self.rule, "clock reconciled");
        self.counter
    }

    /// Reconcile only when a counter was actually received.
    ///
    /// A missing or unparsable header is not an error; it just means there
    /// is nothing to reconcile with.
    pub fn observe(&mut self, received: Option<u64>) -> u64 {
        match received {
            Some(value) => self.reconcile(value),
            None => self.counter,
        }
    }

    /// Current counter value without advancing the clock.
    #[must_use]
    pub fn snapshot(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_strictly_increases() {
        let mut clock = LamportClock::new();

        let t1 = clock.tick();
        let t2 = clock.tick();
        let t3 = clock.tick();

        assert_eq!(t1, 1);
        assert!(t1 < t2);
        assert!(t2 < t3);
        assert_eq!(clock.snapshot(), 3);
    }

    #[test]
    fn reconcile_takes_max_plus_one() {
        let mut clock = LamportClock::starting_at(5, ClockRule::Lamport);

        assert_eq!(clock.reconcile(2), 6);
        assert_eq!(clock.reconcile(10), 11);
        // Equal values still move strictly past both
        assert_eq!(clock.reconcile(11), 12);
    }

    #[test]
    fn additive_rule_matches_legacy_arithmetic() {
        let mut clock = LamportClock::starting_at(3, ClockRule::Additive);

        assert_eq!(clock.reconcile(4), 8);
        assert_eq!(clock.reconcile(0), 9);
    }

    #[test]
    fn monotonic_across_mixed_operations() {
        for rule in [ClockRule::Lamport, ClockRule::Additive] {
            let mut clock = LamportClock::with_rule(rule);
            let mut last = clock.snapshot();

            for received in [0, 7, 3, 3, 100, 1, 0, 42] {
                let ticked = clock.tick();
                assert!(ticked > last);
                last = ticked;

                let reconciled = clock.reconcile(received);
                assert!(reconciled > last);
                assert!(reconciled > received);
                last = reconciled;
            }
        }
    }

    #[test]
    fn observe_none_leaves_counter_alone() {
        let mut clock = LamportClock::starting_at(9, ClockRule::Lamport);

        assert_eq!(clock.observe(None), 9);
        assert_eq!(clock.observe(Some(20)), 21);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let mut clock = LamportClock::starting_at(u64::MAX - 1, ClockRule::Additive);

        assert_eq!(clock.tick(), u64::MAX);
        assert_eq!(clock.tick(), u64::MAX);
        assert_eq!(clock.reconcile(u64::MAX), u64::MAX);
    }

    #[test]
    fn parse_clock_rule() {
        assert_eq!("lamport".parse::<ClockRule>().unwrap(), ClockRule::Lamport);
        assert_eq!(" Additive ".parse::<ClockRule>().unwrap(), ClockRule::Additive);
        assert!("vector".parse::<ClockRule>().is_err());
        assert_eq!(ClockRule::default().to_string(), "lamport");
    }
}
