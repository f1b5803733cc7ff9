//! The in-memory bundle index.
//!
//! Every backend owns one [`BundleIndex`] and mutates it under its own
//! lock. The index answers `count`/`size`/selector/destination queries
//! without payload I/O; the backend keeps it consistent with whatever
//! bytes are resident or persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Instant;

use dtnd_types::{BundleId, DtnTime, EndpointId, MetaBundle};

use crate::bloom::BloomFilter;

/// Backend-specific location token for a stored record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// The record lives in the backend's resident map.
    Resident,
    /// The record is (or will be) persisted at this path.
    File(PathBuf),
}

/// One index entry: metadata, byte accounting, location, and write state.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    /// Metadata view of the stored bundle.
    pub meta: MetaBundle,
    /// Encoded byte length of the record.
    pub len: u64,
    /// Where the record's bytes live.
    pub location: Location,
    /// `true` while a deferred write for this entry has not completed.
    pub pending: bool,
    /// When the bundle became resident; baseline for age refresh.
    pub stored_at: Instant,
}

impl IndexEntry {
    /// Create an entry for a completed (non-pending) record.
    pub fn new(meta: MetaBundle, len: u64, location: Location) -> Self {
        Self {
            meta,
            len,
            location,
            pending: false,
            stored_at: Instant::now(),
        }
    }

    /// Create an entry whose write is still queued.
    pub fn pending(meta: MetaBundle, len: u64, location: Location) -> Self {
        Self {
            pending: true,
            ..Self::new(meta, len, location)
        }
    }
}

/// Index mapping bundle identity to entry state.
///
/// Iteration order is the `BundleId` ordering, deterministic for a fixed
/// index state.
#[derive(Default)]
pub struct BundleIndex {
    entries: BTreeMap<BundleId, IndexEntry>,
}

impl BundleIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, keyed by its metadata's identity.
    ///
    /// First write wins: if the identity is already indexed the existing
    /// entry is left untouched and `false` is returned.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        match self.entries.entry(entry.meta.id.clone()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Look up an entry.
    pub fn get(&self, id: &BundleId) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&mut self, id: &BundleId) -> Option<IndexEntry> {
        self.entries.remove(id)
    }

    /// Returns `true` if the identity is indexed.
    pub fn contains(&self, id: &BundleId) -> bool {
        self.entries.contains_key(id)
    }

    /// Clear the deferred-write flag once the record is durable.
    pub fn mark_persisted(&mut self, id: &BundleId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.pending = false;
        }
    }

    /// Number of distinct identities indexed.
    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Sum of encoded byte lengths of all indexed records.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.len).sum()
    }

    /// Returns `true` if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything, returning the drained entries so the backend can
    /// release their records.
    pub fn drain(&mut self) -> Vec<IndexEntry> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Iterate metadata in index order.
    pub fn metas(&self) -> impl Iterator<Item = &MetaBundle> {
        self.entries.values().map(|e| &e.meta)
    }

    /// Unique destination endpoints across all indexed metadata.
    pub fn distinct_destinations(&self) -> BTreeSet<EndpointId> {
        self.entries
            .values()
            .map(|e| e.meta.destination.clone())
            .collect()
    }

    /// Identities of all entries expired at the given logical time.
    pub fn expired(&self, now: DtnTime) -> Vec<BundleId> {
        self.entries
            .values()
            .filter(|e| e.meta.is_expired(now))
            .map(|e| e.meta.id.clone())
            .collect()
    }

    /// The first indexed identity the filter flags as possibly present.
    pub fn first_matching(&self, filter: &BloomFilter) -> Option<BundleId> {
        self.entries
            .keys()
            .find(|id| filter.may_contain(&id.to_string()))
            .cloned()
    }
}

impl std::fmt::Debug for BundleIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleIndex")
            .field("entries", &self.entries.len())
            .field("total_bytes", &self.total_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtnd_types::{Bundle, DtnTime, EndpointId};

    fn endpoint(uri: &str) -> EndpointId {
        EndpointId::parse(uri).unwrap()
    }

    fn make_entry(dest: &str, lifetime: u64) -> IndexEntry {
        let bundle = Bundle::new(
            endpoint("dtn://node-one/test"),
            endpoint(dest),
            DtnTime::new(1000),
            lifetime,
        );
        IndexEntry::new(MetaBundle::of(&bundle), 100, Location::Resident)
    }

    #[test]
    fn insert_and_count() {
        let mut index = BundleIndex::new();
        assert!(index.is_empty());

        let entry = make_entry("dtn://node-two/a", 60);
        let id = entry.meta.id.clone();
        assert!(index.insert(entry));
        assert_eq!(index.count(), 1);
        assert!(index.contains(&id));
        assert_eq!(index.total_bytes(), 100);
    }

    #[test]
    fn first_write_wins() {
        let mut index = BundleIndex::new();
        let entry = make_entry("dtn://node-two/a", 60);
        let id = entry.meta.id.clone();
        assert!(index.insert(entry));

        // Same identity, different destination and length.
        let mut dup = make_entry("dtn://node-three/b", 60);
        dup.meta.id = id.clone();
        dup.len = 999;
        assert!(!index.insert(dup));

        assert_eq!(index.count(), 1);
        let kept = index.get(&id).unwrap();
        assert_eq!(kept.len, 100);
        assert_eq!(kept.meta.destination, endpoint("dtn://node-two/a"));
    }

    #[test]
    fn remove_returns_entry() {
        let mut index = BundleIndex::new();
        let entry = make_entry("dtn://node-two/a", 60);
        let id = entry.meta.id.clone();
        index.insert(entry);

        assert!(index.remove(&id).is_some());
        assert!(index.remove(&id).is_none());
        assert!(index.is_empty());
        assert_eq!(index.total_bytes(), 0);
    }

    #[test]
    fn mark_persisted_clears_pending() {
        let mut index = BundleIndex::new();
        let bundle = Bundle::new(
            endpoint("dtn://node-one/test"),
            endpoint("dtn://node-two/a"),
            DtnTime::new(1000),
            60,
        );
        let id = bundle.id();
        index.insert(IndexEntry::pending(
            MetaBundle::of(&bundle),
            100,
            Location::File(PathBuf::from("/tmp/x.bundle")),
        ));
        assert!(index.get(&id).unwrap().pending);

        index.mark_persisted(&id);
        assert!(!index.get(&id).unwrap().pending);
    }

    #[test]
    fn distinct_destinations_deduplicates() {
        let mut index = BundleIndex::new();
        for i in 0..10 {
            index.insert(make_entry(&format!("dtn://node-two/{i}"), 60));
        }
        for i in 5..10 {
            index.insert(make_entry(&format!("dtn://node-two/{i}"), 60));
        }
        assert_eq!(index.count(), 15);
        assert_eq!(index.distinct_destinations().len(), 10);
    }

    #[test]
    fn expired_scan_honors_boundary() {
        let mut index = BundleIndex::new();
        index.insert(make_entry("dtn://node-two/a", 20));
        index.insert(make_entry("dtn://node-two/b", 200));

        assert!(index.expired(DtnTime::new(1019)).is_empty());
        assert_eq!(index.expired(DtnTime::new(1020)).len(), 1);
        assert_eq!(index.expired(DtnTime::new(5000)).len(), 2);
    }

    #[test]
    fn first_matching_finds_only_flagged_identities() {
        let mut index = BundleIndex::new();
        let entries: Vec<IndexEntry> =
            (0..5).map(|i| make_entry(&format!("dtn://node-two/{i}"), 60)).collect();
        let ids: Vec<BundleId> = entries.iter().map(|e| e.meta.id.clone()).collect();
        for entry in entries {
            index.insert(entry);
        }

        let mut filter = BloomFilter::new(16, 0.001);
        filter.insert(&ids[3].to_string());

        // Drain every match; the flagged identity must be among them (no
        // false negatives), false positives may tag along.
        let mut matched = Vec::new();
        while let Some(id) = index.first_matching(&filter) {
            index.remove(&id);
            matched.push(id);
        }
        assert!(matched.contains(&ids[3]));
        assert_eq!(index.count(), 5 - matched.len() as u64);
    }

    #[test]
    fn drain_empties_the_index() {
        let mut index = BundleIndex::new();
        for i in 0..4 {
            index.insert(make_entry(&format!("dtn://node-two/{i}"), 60));
        }
        let drained = index.drain();
        assert_eq!(drained.len(), 4);
        assert!(index.is_empty());
    }
}
