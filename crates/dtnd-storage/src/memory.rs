use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::{debug, info};

use dtnd_types::{Bundle, BundleId, DtnTime, EndpointId, MetaBundle};

use crate::bloom::BloomFilter;
use crate::error::{StorageError, StorageResult};
use crate::index::{BundleIndex, IndexEntry, Location};
use crate::selector::{run_query, BundleSelector};
use crate::traits::{refresh_age, BundleStorage};

/// Memory-only bundle storage.
///
/// Index and records live behind one `RwLock`; nothing is persisted, so
/// after `terminate` + `startup` the storage is simply empty
/// ([`persistent`](BundleStorage::persistent) is `false`). `size()` uses
/// the codec's encoded length, computed once at store time.
pub struct MemoryBundleStorage {
    state: RwLock<MemoryState>,
    faulty: AtomicBool,
}

#[derive(Default)]
struct MemoryState {
    index: BundleIndex,
    bundles: HashMap<BundleId, Bundle>,
}

impl MemoryBundleStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            faulty: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryBundleStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleStorage for MemoryBundleStorage {
    fn startup(&self) -> StorageResult<()> {
        Ok(())
    }

    fn terminate(&self) -> StorageResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.index.drain();
        state.bundles.clear();
        Ok(())
    }

    fn persistent(&self) -> bool {
        false
    }

    fn store(&self, bundle: &Bundle) -> StorageResult<()> {
        if self.faulty.load(Ordering::Relaxed) {
            return Ok(());
        }
        let len = dtnd_codec::encoded_len(bundle)?;
        let meta = MetaBundle::of(bundle);
        let id = meta.id.clone();

        let mut state = self.state.write().expect("lock poisoned");
        if state
            .index
            .insert(IndexEntry::new(meta, len, Location::Resident))
        {
            state.bundles.insert(id.clone(), bundle.clone());
            debug!(%id, len, "bundle stored");
        }
        Ok(())
    }

    fn get(&self, id: &BundleId) -> StorageResult<Bundle> {
        if self.faulty.load(Ordering::Relaxed) {
            return Err(StorageError::NoBundleFound);
        }
        let state = self.state.read().expect("lock poisoned");
        let entry = state.index.get(id).ok_or(StorageError::NoBundleFound)?;
        let resident_secs = entry.stored_at.elapsed().as_secs();
        let mut bundle = state
            .bundles
            .get(id)
            .cloned()
            .ok_or(StorageError::NoBundleFound)?;
        drop(state);

        refresh_age(&mut bundle, resident_secs);
        Ok(bundle)
    }

    fn info(&self, id: &BundleId) -> StorageResult<MetaBundle> {
        let state = self.state.read().expect("lock poisoned");
        state
            .index
            .get(id)
            .map(|e| e.meta.clone())
            .ok_or(StorageError::NoBundleFound)
    }

    fn contains(&self, id: &BundleId) -> bool {
        self.state
            .read()
            .expect("lock poisoned")
            .index
            .contains(id)
    }

    fn remove(&self, id: &BundleId) -> StorageResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state
            .index
            .remove(id)
            .ok_or(StorageError::NoBundleFound)?;
        state.bundles.remove(id);
        debug!(%id, "bundle removed");
        Ok(())
    }

    fn remove_matching(&self, filter: &BloomFilter) -> StorageResult<BundleId> {
        let mut state = self.state.write().expect("lock poisoned");
        let id = state
            .index
            .first_matching(filter)
            .ok_or(StorageError::NoBundleFound)?;
        state.index.remove(&id);
        state.bundles.remove(&id);
        debug!(%id, "bundle removed by filter");
        Ok(id)
    }

    fn clear(&self) -> StorageResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.index.drain();
        state.bundles.clear();
        Ok(())
    }

    fn count(&self) -> u64 {
        self.state.read().expect("lock poisoned").index.count()
    }

    fn size(&self) -> u64 {
        self.state
            .read()
            .expect("lock poisoned")
            .index
            .total_bytes()
    }

    fn distinct_destinations(&self) -> BTreeSet<EndpointId> {
        self.state
            .read()
            .expect("lock poisoned")
            .index
            .distinct_destinations()
    }

    fn query(
        &self,
        selector: &dyn BundleSelector,
        results: &mut Vec<MetaBundle>,
    ) -> StorageResult<()> {
        let state = self.state.read().expect("lock poisoned");
        run_query(&state.index, selector, results)
    }

    fn release_custody(&self, custodian: &EndpointId, id: &BundleId) {
        debug!(%custodian, %id, "custody released");
    }

    fn expire(&self, now: DtnTime) -> StorageResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let expired = state.index.expired(now);
        for id in &expired {
            state.index.remove(id);
            state.bundles.remove(id);
        }
        if !expired.is_empty() {
            info!(evicted = expired.len(), %now, "expired bundles evicted");
        }
        Ok(())
    }

    fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MemoryBundleStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBundleStorage")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorRejected;
    use dtnd_types::DtnTime;

    fn endpoint(uri: &str) -> EndpointId {
        EndpointId::parse(uri).unwrap()
    }

    fn make_bundle() -> Bundle {
        Bundle::new(
            endpoint("dtn://node-one/test"),
            endpoint("dtn://node-two/test"),
            DtnTime::new(1000),
            60,
        )
    }

    fn make_payload_bundle() -> Bundle {
        let mut b = make_bundle();
        b.push_payload(b"Hallo Welt\n".to_vec());
        b
    }

    #[test]
    fn store_increments_count() {
        let storage = MemoryBundleStorage::new();
        assert_eq!(storage.count(), 0);
        storage.store(&make_bundle()).unwrap();
        assert_eq!(storage.count(), 1);
    }

    #[test]
    fn store_then_remove_restores_count() {
        let storage = MemoryBundleStorage::new();
        let b = make_bundle();
        storage.store(&b).unwrap();
        assert_eq!(storage.count(), 1);

        storage.remove(&b.id()).unwrap();
        assert_eq!(storage.count(), 0);
        assert!(storage.is_empty());
    }

    #[test]
    fn remove_missing_fails() {
        let storage = MemoryBundleStorage::new();
        let err = storage.remove(&make_bundle().id()).unwrap_err();
        assert!(matches!(err, StorageError::NoBundleFound));
    }

    #[test]
    fn get_returns_stored_bundle() {
        let storage = MemoryBundleStorage::new();
        let b = make_payload_bundle();
        storage.store(&b).unwrap();

        let got = storage.get(&b.id()).unwrap();
        assert_eq!(got.id(), b.id());
        assert_eq!(got.payload(), b.payload());
    }

    #[test]
    fn age_block_is_refreshed_not_reset() {
        let storage = MemoryBundleStorage::new();
        let mut b = make_payload_bundle();
        b.push_age(42);
        storage.store(&b).unwrap();
        storage.wait().unwrap();

        let got = storage.get(&b.id()).unwrap();
        assert!(got.age_seconds().expect("age block missing") >= 42);
    }

    #[test]
    fn double_store_is_idempotent() {
        let storage = MemoryBundleStorage::new();
        let mut b = make_bundle();
        for i in 0..2 {
            b.destination = endpoint(&format!("dtn://node-two/{i}"));
            storage.store(&b).unwrap();
        }
        assert_eq!(storage.count(), 1);

        // First write wins: the retained record has the original destination.
        let got = storage.get(&b.id()).unwrap();
        assert_eq!(got.destination, endpoint("dtn://node-two/0"));
    }

    #[test]
    fn size_matches_encoded_length() {
        let storage = MemoryBundleStorage::new();
        let b = make_payload_bundle();
        assert_eq!(storage.size(), 0);

        storage.store(&b).unwrap();
        assert_eq!(storage.size(), dtnd_codec::encoded_len(&b).unwrap());
    }

    #[test]
    fn clear_empties_storage() {
        let storage = MemoryBundleStorage::new();
        storage.store(&make_bundle()).unwrap();
        storage.store(&make_bundle()).unwrap();
        assert!(!storage.is_empty());

        storage.clear().unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.size(), 0);
    }

    #[test]
    fn info_and_contains_without_payload() {
        let storage = MemoryBundleStorage::new();
        let b = make_payload_bundle();
        assert!(!storage.contains(&b.id()));

        storage.store(&b).unwrap();
        assert!(storage.contains(&b.id()));
        let meta = storage.info(&b.id()).unwrap();
        assert_eq!(meta, MetaBundle::of(&b));
    }

    #[test]
    fn expiration_is_driven_by_logical_time() {
        let storage = MemoryBundleStorage::new();
        let mut b = make_bundle();
        b.lifetime = 20;
        storage.store(&b).unwrap();

        storage.expire(DtnTime::new(1019)).unwrap();
        assert_eq!(storage.count(), 1);

        storage.expire(DtnTime::new(1021)).unwrap();
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn distinct_destinations() {
        let storage = MemoryBundleStorage::new();
        let mut b = make_bundle();
        for i in 0..10 {
            b.relabel();
            b.destination = endpoint(&format!("dtn://node-two/{i}"));
            storage.store(&b).unwrap();
        }
        for i in 5..10 {
            b.relabel();
            b.destination = endpoint(&format!("dtn://node-two/{i}"));
            storage.store(&b).unwrap();
        }
        assert_eq!(storage.count(), 15);
        assert_eq!(storage.distinct_destinations().len(), 10);
    }

    struct DestinationSelector {
        destination: EndpointId,
    }

    impl BundleSelector for DestinationSelector {
        fn limit(&self) -> usize {
            5
        }

        fn should_add(&self, meta: &MetaBundle) -> Result<bool, SelectorRejected> {
            Ok(meta.destination == self.destination)
        }
    }

    #[test]
    fn selector_returns_only_matches() {
        let storage = MemoryBundleStorage::new();
        let mut b = make_bundle();
        for i in 0..10 {
            b.relabel();
            b.destination = endpoint(&format!("dtn://node-two/{i}"));
            storage.store(&b).unwrap();
        }
        for i in 5..10 {
            b.relabel();
            b.destination = endpoint(&format!("dtn://node-two/{i}"));
            storage.store(&b).unwrap();
        }

        let selector = DestinationSelector {
            destination: endpoint("dtn://node-two/6"),
        };
        let mut results = Vec::new();
        storage.query(&selector, &mut results).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn bloom_filter_removal_drains_marked_bundles() {
        let storage = MemoryBundleStorage::new();
        let mut bundles = Vec::new();
        for i in 0..20 {
            let mut b = make_bundle();
            b.destination = endpoint(&format!("dtn://node-two/{i}"));
            bundles.push(b.clone());
            storage.store(&b).unwrap();
        }

        let mut filter = BloomFilter::new(64, 0.001);
        filter.insert(&bundles[1].id().to_string());
        filter.insert(&bundles[4].id().to_string());
        filter.insert(&bundles[11].id().to_string());

        let mut removed = Vec::new();
        loop {
            match storage.remove_matching(&filter) {
                Ok(id) => removed.push(id),
                Err(StorageError::NoBundleFound) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        // The marked identities are gone; false positives may add to the
        // removal set but never leave a marked bundle behind.
        for i in [1, 4, 11] {
            assert!(removed.contains(&bundles[i].id()));
            assert!(!storage.contains(&bundles[i].id()));
        }
        assert!(removed.len() >= 3);
        assert_eq!(storage.count(), 20 - removed.len() as u64);
    }

    #[test]
    fn faulty_get_fails_for_stored_bundle() {
        let storage = MemoryBundleStorage::new();
        let b = make_payload_bundle();
        storage.store(&b).unwrap();
        storage.wait().unwrap();

        storage.set_faulty(true);
        assert!(matches!(
            storage.get(&b.id()).unwrap_err(),
            StorageError::NoBundleFound
        ));
        storage.set_faulty(false);
        assert!(storage.get(&b.id()).is_ok());
    }

    #[test]
    fn faulty_store_drops_silently() {
        let storage = MemoryBundleStorage::new();
        let b = make_payload_bundle();

        storage.set_faulty(true);
        storage.store(&b).unwrap();
        storage.wait().unwrap();
        storage.set_faulty(false);

        // Nothing was indexed while faulty.
        assert!(matches!(
            storage.get(&b.id()).unwrap_err(),
            StorageError::NoBundleFound
        ));
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn release_custody_does_not_alter_membership() {
        let storage = MemoryBundleStorage::new();
        let b = make_bundle();
        storage.store(&b).unwrap();
        storage.release_custody(&endpoint("dtn://node-three/custody"), &b.id());
        assert_eq!(storage.count(), 1);
    }

    #[test]
    fn restart_loses_everything() {
        let storage = MemoryBundleStorage::new();
        storage.initialize().unwrap();
        storage.startup().unwrap();
        for _ in 0..5 {
            storage.store(&make_bundle()).unwrap();
        }
        assert_eq!(storage.count(), 5);

        // Memory-only: no recovery after a restart cycle.
        storage.terminate().unwrap();
        assert!(storage.is_empty());
        storage.startup().unwrap();
        assert_eq!(storage.count(), 0);
        assert!(!storage.persistent());
    }

    #[test]
    fn concurrent_store_get_remove_keeps_count_consistent() {
        use std::sync::Arc;
        use std::thread;

        let storage = Arc::new(MemoryBundleStorage::new());
        let list1: Vec<Bundle> = (0..100).map(|_| make_payload_bundle()).collect();
        let list2: Vec<Bundle> = (0..100).map(|_| make_payload_bundle()).collect();

        let handles: Vec<_> = [list1.clone(), list2.clone()]
            .into_iter()
            .map(|list| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for b in &list {
                        storage.store(b).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("store thread panicked");
        }
        assert_eq!(storage.count(), 200);

        for b in &list1 {
            let got = storage.get(&b.id()).unwrap();
            storage.remove(&got.id()).unwrap();
        }
        assert_eq!(storage.count(), 100);
    }
}
