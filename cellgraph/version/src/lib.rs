//! Versioning infrastructure shared by the element store.
//!
//! Each element keeps its latest state plus an undo chain of earlier states, newest first, so
//! that reads at an earlier timestamp can be answered without replaying the event log.

pub mod error;
pub mod timestamp;

pub use error::TimestampError;
pub use timestamp::{ClockMode, Timestamp, TimestampGenerator};

/// A generic undo log entry: the state that was current until `timestamp`'s successor.
///
/// Type parameter `T` is the versioned payload (e.g. an element record).
#[derive(Debug, Clone)]
pub struct UndoEntry<T> {
    /// The payload of the superseded version
    delta: T,
    /// The timestamp when this version was created
    timestamp: Timestamp,
}

impl<T> UndoEntry<T> {
    /// Create a new UndoEntry
    pub fn new(delta: T, timestamp: Timestamp) -> Self {
        Self { delta, timestamp }
    }

    /// Get the payload of the undo entry
    pub fn delta(&self) -> &T {
        &self.delta
    }

    /// Get the timestamp of the undo entry
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// The latest installed version.
#[derive(Debug, Clone)]
pub struct CurrentVersion<T> {
    pub data: T,
    pub commit_ts: Timestamp,
}

/// The latest version of a value followed by its undo chain.
///
/// Versions are installed with strictly increasing commit timestamps, so the chain is ordered
/// newest first and a read at `ts` returns the first version whose timestamp is `<= ts`.
#[derive(Debug, Clone)]
pub struct VersionChain<T> {
    current: CurrentVersion<T>,
    undo: Vec<UndoEntry<T>>,
}

impl<T> VersionChain<T> {
    pub fn new(data: T, commit_ts: Timestamp) -> Self {
        Self {
            current: CurrentVersion { data, commit_ts },
            undo: Vec::new(),
        }
    }

    #[inline]
    pub fn current(&self) -> &CurrentVersion<T> {
        &self.current
    }

    #[inline]
    pub fn commit_ts(&self) -> Timestamp {
        self.current.commit_ts
    }

    /// Installs `data` as the latest version, pushing the previous one onto the undo chain.
    ///
    /// Returns `false` and leaves the chain untouched if `commit_ts` does not advance it.
    pub fn install(&mut self, data: T, commit_ts: Timestamp) -> bool {
        if commit_ts <= self.current.commit_ts {
            return false;
        }
        let previous = std::mem::replace(&mut self.current, CurrentVersion { data, commit_ts });
        self.undo
            .insert(0, UndoEntry::new(previous.data, previous.commit_ts));
        true
    }

    /// Returns the version visible at `ts`, or `None` if the value did not exist yet.
    pub fn visible_at(&self, ts: Timestamp) -> Option<&T> {
        if self.current.commit_ts <= ts {
            return Some(&self.current.data);
        }
        self.undo
            .iter()
            .find(|entry| entry.timestamp <= ts)
            .map(|entry| &entry.delta)
    }

    /// The superseded versions, newest first.
    pub fn undo_entries(&self) -> &[UndoEntry<T>] {
        &self.undo
    }

    /// Iterates every version mutably, current first. Used to purge data from all versions.
    pub fn versions_mut(&mut self) -> impl Iterator<Item = &mut T> {
        std::iter::once(&mut self.current.data).chain(self.undo.iter_mut().map(|e| &mut e.delta))
    }

    /// Number of versions including the current one.
    pub fn version_count(&self) -> usize {
        self.undo.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: u64) -> Timestamp {
        Timestamp::with_ts(raw)
    }

    #[test]
    fn test_visible_at_walks_undo_chain() {
        let mut chain = VersionChain::new("v1", ts(10));
        assert!(chain.install("v2", ts(20)));
        assert!(chain.install("v3", ts(30)));
        assert_eq!(chain.version_count(), 3);

        assert_eq!(chain.visible_at(ts(5)), None);
        assert_eq!(chain.visible_at(ts(10)), Some(&"v1"));
        assert_eq!(chain.visible_at(ts(25)), Some(&"v2"));
        assert_eq!(chain.visible_at(ts(30)), Some(&"v3"));
        assert_eq!(chain.visible_at(Timestamp::MAX), Some(&"v3"));

        let undo_ts: Vec<_> = chain.undo_entries().iter().map(|e| e.timestamp().raw()).collect();
        assert_eq!(undo_ts, vec![20, 10]);
    }

    #[test]
    fn test_install_rejects_stale_timestamp() {
        let mut chain = VersionChain::new(1, ts(10));
        assert!(!chain.install(2, ts(10)));
        assert!(!chain.install(2, ts(9)));
        assert_eq!(chain.current().data, 1);
        assert_eq!(chain.version_count(), 1);
    }

    #[test]
    fn test_versions_mut_reaches_every_version() {
        let mut chain = VersionChain::new(vec![1], ts(1));
        chain.install(vec![1, 2], ts(2));
        for version in chain.versions_mut() {
            version.retain(|v| *v != 1);
        }
        assert_eq!(chain.visible_at(ts(1)), Some(&vec![]));
        assert_eq!(chain.visible_at(ts(2)), Some(&vec![2]));
    }
}
