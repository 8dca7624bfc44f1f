//! Readings and the merged content store.
//!
//! A [`Reading`] is one producer's payload. The [`ContentStore`] keeps the
//! latest value per key across all producers; merging a reading overwrites
//! the keys it carries and leaves every other key untouched.

use std::collections::BTreeMap;
use tokio::time::Instant;

/// Immutable copy of the store's key/value mapping, ordered by key.
pub type Snapshot = BTreeMap<String, String>;

/// One producer's payload: ordered key/value pairs as supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reading {
    entries: Vec<(String, String)>,
}

impl Reading {
    /// Create an empty reading.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key/value pair. A later pair for the same key wins on merge.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Number of pairs, counting repeated keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the reading carries no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the pairs in producer order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Reading
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Reading {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// The aggregator's merged view of every producer's latest reading.
#[derive(Debug, Clone, Default)]
pub struct ContentStore {
    entries: Snapshot,
    last_updated: Option<Instant>,
}

impl ContentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a reading into the store.
    ///
    /// Returns `true` if the store was empty immediately before this call.
    pub fn merge(&mut self, reading: Reading) -> bool {
        let was_empty = self.entries.is_empty();
        let incoming = reading.len();

        for (key, value) in reading {
            self.entries.insert(key, value);
        }
        self.last_updated = Some(Instant::now());

        tracing::debug!(incoming, total = self.entries.len(), was_empty, "reading merged");
        was_empty
    }

    /// Copy of the current mapping; empty when nothing has been merged.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.entries.clone()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(evicted = self.entries.len(), "content store cleared");
        }
        self.entries.clear();
        self.last_updated = None;
    }

    /// Look up the current value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the last merge happened, if any since the last clear.
    #[must_use]
    pub fn last_updated(&self) -> Option<Instant> {
        self.last_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(pairs: &[(&str, &str)]) -> Reading {
        pairs.iter().copied().collect()
    }

    #[test]
    fn first_merge_reports_empty() {
        let mut store = ContentStore::new();

        assert!(store.merge(reading(&[("temp", "20")])));
        assert!(!store.merge(reading(&[("temp", "21")])));
        assert!(!store.merge(reading(&[("humidity", "40")])));

        store.clear();
        assert!(store.merge(reading(&[("temp", "22")])));
    }

    #[test]
    fn merge_overwrites_and_keeps_other_keys() {
        let mut store = ContentStore::new();
        store.merge(reading(&[("temp", "20"), ("wind", "5")]));
        store.merge(reading(&[("temp", "21")]));

        assert_eq!(store.get("temp"), Some("21"));
        assert_eq!(store.get("wind"), Some("5"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn merge_is_idempotent() {
        let r = reading(&[("a", "1"), ("b", "2")]);

        let mut once = ContentStore::new();
        once.merge(r.clone());

        let mut twice = ContentStore::new();
        twice.merge(r.clone());
        twice.merge(r);

        assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn merge_disjoint_readings_is_union() {
        let mut store = ContentStore::new();
        store.merge(reading(&[("a", "1")]));
        store.merge(reading(&[("b", "2")]));

        let expected: Snapshot = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(store.snapshot(), expected);
    }

    #[test]
    fn repeated_key_in_one_reading_last_wins() {
        let mut store = ContentStore::new();
        store.merge(reading(&[("k", "first"), ("k", "second")]));

        assert_eq!(store.get("k"), Some("second"));
    }

    #[test]
    fn clear_resets_timestamp() {
        let mut store = ContentStore::new();
        assert!(store.last_updated().is_none());

        store.merge(reading(&[("a", "1")]));
        assert!(store.last_updated().is_some());

        store.clear();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
        assert!(store.last_updated().is_none());

        // Clearing an empty store is a no-op
        store.clear();
        assert!(store.is_empty());
    }
}
