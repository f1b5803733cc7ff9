//! Bundle storage engine for dtnd.
//!
//! Durably holds bundles between hops while routing decides what to
//! forward, and survives daemon restarts without losing queued data.
//!
//! # Components
//!
//! - [`BundleStorage`] — the backend contract: store/get/remove, counting,
//!   selector queries, eviction, the drain barrier, and lifecycle
//! - [`MemoryBundleStorage`] — everything resident, nothing persisted
//! - [`DiskBundleStorage`] — one file per bundle with a background writer
//!   and crash-safe index recovery
//! - [`BundleIndex`] — identity → metadata/location map shared by the
//!   backends, answering queries without payload I/O
//! - [`BundleSelector`] — caller-supplied metadata predicates with a
//!   result cap
//! - [`BloomFilter`] — probabilistic "already handled elsewhere" oracle
//!   driving bulk removal
//! - [`TickListener`] — subscribes a storage to the daemon's logical clock
//!   for time-driven eviction
//!
//! # Design Rules
//!
//! 1. The index is the single shared mutable resource; every logical
//!    operation holds its backend's lock exactly once.
//! 2. Durable I/O runs outside the index lock; `wait()` is the only
//!    barrier.
//! 3. Store is idempotent on identity; first write wins.
//! 4. Expiry is a function of logical time, never of the wall clock.
//! 5. Backend differences are capability flags, not downcasts.

pub mod bloom;
pub mod disk;
pub mod error;
pub mod expire;
pub mod index;
pub mod memory;
pub mod selector;
pub mod traits;

pub use bloom::BloomFilter;
pub use disk::{DiskBundleStorage, DiskStorageConfig, SyncMode};
pub use error::{StorageError, StorageResult};
pub use expire::{TickListener, TimeTick};
pub use index::{BundleIndex, IndexEntry, Location};
pub use memory::MemoryBundleStorage;
pub use selector::{BundleSelector, SelectorRejected};
pub use traits::BundleStorage;
