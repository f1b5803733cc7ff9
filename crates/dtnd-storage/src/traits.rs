use std::collections::BTreeSet;

use dtnd_types::{Bundle, BundleId, DtnTime, EndpointId, MetaBundle};

use crate::bloom::BloomFilter;
use crate::error::StorageResult;
use crate::selector::BundleSelector;

/// The bundle storage contract.
///
/// All backends behave identically from the caller's point of view:
///
/// - `store` is idempotent on identity: re-storing an already-indexed
///   identity is a no-op, the prior record is retained, and `count()` does
///   not grow.
/// - Index-mutating and index-reading operations are mutually exclusive at
///   the granularity of one logical operation; a `get` racing a `remove`
///   of the same identity either sees the record or gets
///   [`NoBundleFound`](crate::StorageError::NoBundleFound), never a torn
///   read.
/// - Durable writes run outside the index lock; `wait()` is the drain
///   barrier for backends that defer persistence.
/// - Backend-specific behavior is exposed as capability flags
///   ([`persistent`](Self::persistent)), never by downcasting.
pub trait BundleStorage: Send + Sync {
    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Prepare the backing storage location. Invoked by the hosting
    /// process before `startup`.
    fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Bring the storage online. Disk-backed implementations rebuild their
    /// index from persisted records here, so pre-restart state is visible
    /// without replaying `store` calls.
    fn startup(&self) -> StorageResult<()>;

    /// Take the storage offline, dropping in-memory index state. Persisted
    /// bytes survive untouched. A later `startup` on the same instance
    /// models a restart without process exit.
    fn terminate(&self) -> StorageResult<()>;

    /// Capability flag: does this backend rebuild state on `startup`?
    ///
    /// A memory-only backend returns `false`; after `terminate` +
    /// `startup` it is simply empty. This is a documented capability gap,
    /// not a bug.
    fn persistent(&self) -> bool;

    // -------------------------------------------------------------------
    // Record operations
    // -------------------------------------------------------------------

    /// Store a bundle. With the fault switch engaged, the call succeeds
    /// but nothing is indexed or persisted.
    fn store(&self, bundle: &Bundle) -> StorageResult<()>;

    /// Retrieve the full record for an identity.
    ///
    /// The returned bundle's age block, if present, is refreshed by the
    /// seconds the bundle spent resident in this storage.
    fn get(&self, id: &BundleId) -> StorageResult<Bundle>;

    /// Retrieve the metadata for an identity without payload I/O.
    fn info(&self, id: &BundleId) -> StorageResult<MetaBundle>;

    /// Returns `true` if the identity is currently indexed.
    fn contains(&self, id: &BundleId) -> bool;

    /// Delete one entry. Fails with
    /// [`NoBundleFound`](crate::StorageError::NoBundleFound) when the
    /// identity is not indexed, consistent with
    /// [`remove_matching`](Self::remove_matching)'s exhaustion signal.
    fn remove(&self, id: &BundleId) -> StorageResult<()>;

    /// Delete ONE entry whose identity string the filter flags as possibly
    /// present, returning its identity. Fails with
    /// [`NoBundleFound`](crate::StorageError::NoBundleFound) once no
    /// indexed entry matches; callers purge by looping until that error.
    fn remove_matching(&self, filter: &BloomFilter) -> StorageResult<BundleId>;

    /// Delete every entry. Synchronous from the caller's perspective:
    /// `count()` is zero when this returns.
    fn clear(&self) -> StorageResult<()>;

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// Number of distinct identities currently indexed.
    fn count(&self) -> u64;

    /// Sum of encoded byte lengths of all currently indexed records.
    fn size(&self) -> u64;

    /// Equivalent to `count() == 0`.
    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Unique destination endpoints across all indexed metadata.
    fn distinct_destinations(&self) -> BTreeSet<EndpointId>;

    /// Run a selector over the index, appending matching metadata to
    /// `results` until the index is exhausted or the selector's limit is
    /// reached. Never loads payload bytes. A predicate rejection aborts
    /// the query; already-appended results stay in `results`.
    fn query(
        &self,
        selector: &dyn BundleSelector,
        results: &mut Vec<MetaBundle>,
    ) -> StorageResult<()>;

    // -------------------------------------------------------------------
    // Housekeeping
    // -------------------------------------------------------------------

    /// Custody-transfer acknowledgment hook. Recorded without altering
    /// index membership.
    fn release_custody(&self, custodian: &EndpointId, id: &BundleId);

    /// Evict every entry expired at the given logical time. For deferred
    /// backends the record deletion is queued and durable only after a
    /// subsequent [`wait`](Self::wait); the index updates immediately.
    fn expire(&self, now: DtnTime) -> StorageResult<()>;

    /// Block until all persistence work queued before this call has
    /// completed, then surface any deferred write failure recorded since
    /// the previous `wait`. A no-op for backends with no deferred writes.
    fn wait(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Toggle the fault-injection switch. While set, `store` silently
    /// drops and `get` always fails; clearing it does not recover bundles
    /// dropped while faulty.
    fn set_faulty(&self, faulty: bool);
}

/// Advance a retrieved bundle's age block by its residency time.
///
/// Bundles without an age block are left unchanged.
pub(crate) fn refresh_age(bundle: &mut Bundle, resident_secs: u64) {
    if let Some(age) = bundle.age_seconds() {
        bundle.set_age_seconds(age.saturating_add(resident_secs));
    }
}
