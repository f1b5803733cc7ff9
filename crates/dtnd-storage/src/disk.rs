//! Disk-backed bundle storage with a deferred write queue.
//!
//! One file per bundle under the storage root, named by the BLAKE3 digest
//! of the identity string, containing the codec's exact frame bytes. The
//! in-memory index is authoritative for `count`/`size`/selector queries; a
//! background single-writer thread drains a FIFO queue of write and unlink
//! tasks so durable I/O never runs under the index lock. `wait()` is the
//! drain barrier: after it returns, every write enqueued before the call is
//! fully durable, and any deferred failure since the previous barrier is
//! reported.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use dtnd_codec::CodecError;
use dtnd_types::{Bundle, BundleId, DtnTime, EndpointId, MetaBundle};

use crate::bloom::BloomFilter;
use crate::error::{StorageError, StorageResult};
use crate::index::{BundleIndex, IndexEntry, Location};
use crate::selector::{run_query, BundleSelector};
use crate::traits::{refresh_age, BundleStorage};

/// File extension for persisted bundles.
const BUNDLE_EXTENSION: &str = "bundle";

/// Flush/sync strategy for bundle files.
#[derive(Clone, Copy, Debug, Default)]
pub enum SyncMode {
    /// `fsync` after every bundle write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for [`DiskBundleStorage`].
#[derive(Clone, Debug, Default)]
pub struct DiskStorageConfig {
    /// Sync strategy for bundle files.
    pub sync_mode: SyncMode,
}

/// Work items for the background writer.
enum Task {
    Write {
        id: BundleId,
        path: PathBuf,
        bytes: Arc<Vec<u8>>,
    },
    Unlink {
        path: PathBuf,
    },
}

/// Outstanding-work counter plus the condition `wait()` blocks on.
struct FlushBarrier {
    state: Mutex<FlushState>,
    cond: Condvar,
}

#[derive(Default)]
struct FlushState {
    outstanding: usize,
    first_error: Option<String>,
}

impl FlushBarrier {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlushState::default()),
            cond: Condvar::new(),
        }
    }

    fn add(&self) {
        self.state.lock().expect("lock poisoned").outstanding += 1;
    }

    fn done(&self, error: Option<String>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.outstanding -= 1;
        if let Some(error) = error {
            state.first_error.get_or_insert(error);
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Block until no work is outstanding; returns the first error recorded
    /// since the previous drain, if any.
    fn drain(&self) -> Option<String> {
        let mut state = self.state.lock().expect("lock poisoned");
        while state.outstanding > 0 {
            state = self.cond.wait(state).expect("lock poisoned");
        }
        state.first_error.take()
    }
}

/// State shared between the storage handle and the writer thread.
struct Shared {
    state: RwLock<Option<DiskState>>,
    flush: FlushBarrier,
    faulty: AtomicBool,
    config: DiskStorageConfig,
}

/// Index plus the cache of not-yet-flushed frames (read-your-writes).
#[derive(Default)]
struct DiskState {
    index: BundleIndex,
    cache: HashMap<BundleId, Arc<Vec<u8>>>,
}

struct WriterHandle {
    sender: Sender<Task>,
    handle: JoinHandle<()>,
}

/// Disk-backed bundle storage.
///
/// The storage root is owned exclusively by one instance at a time;
/// concurrent instances over the same directory are undefined behavior and
/// must be prevented by the hosting daemon's lifecycle.
pub struct DiskBundleStorage {
    root: PathBuf,
    shared: Arc<Shared>,
    writer: Mutex<Option<WriterHandle>>,
}

impl DiskBundleStorage {
    /// Create a storage handle over the given root directory. No I/O
    /// happens until [`initialize`](BundleStorage::initialize) /
    /// [`startup`](BundleStorage::startup).
    pub fn new(root: impl Into<PathBuf>, config: DiskStorageConfig) -> Self {
        Self {
            root: root.into(),
            shared: Arc::new(Shared {
                state: RwLock::new(None),
                flush: FlushBarrier::new(),
                faulty: AtomicBool::new(false),
                config,
            }),
            writer: Mutex::new(None),
        }
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the index from the persisted files under the root.
    ///
    /// Only the frame header of each file is read; files that fail to
    /// parse are logged and skipped, never fatal.
    fn recover(&self) -> StorageResult<DiskState> {
        let mut index = BundleIndex::new();
        let mut recovered = 0usize;
        let mut skipped = 0usize;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let is_bundle = path
                .extension()
                .map(|e| e == BUNDLE_EXTENSION)
                .unwrap_or(false);
            if !is_bundle {
                continue;
            }
            match read_bundle_header(&path) {
                Ok((meta, len)) => {
                    index.insert(IndexEntry::new(meta, len, Location::File(path)));
                    recovered += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable bundle file");
                    skipped += 1;
                }
            }
        }

        info!(root = %self.root.display(), recovered, skipped, "bundle storage recovered");
        Ok(DiskState {
            index,
            cache: HashMap::new(),
        })
    }

    /// Hand a task to the background writer, accounting it on the flush
    /// barrier.
    fn enqueue(&self, task: Task) -> StorageResult<()> {
        let writer = self.writer.lock().expect("lock poisoned");
        let handle = writer.as_ref().ok_or(StorageError::NotStarted)?;
        self.shared.flush.add();
        if handle.sender.send(task).is_err() {
            let error = "background writer is gone".to_string();
            self.shared.flush.done(Some(error.clone()));
            return Err(StorageError::WriteFailed(error));
        }
        Ok(())
    }
}

impl BundleStorage for DiskBundleStorage {
    fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn startup(&self) -> StorageResult<()> {
        let mut writer = self.writer.lock().expect("lock poisoned");
        if writer.is_some() {
            return Ok(());
        }
        fs::create_dir_all(&self.root)?;

        let state = self.recover()?;
        *self.shared.state.write().expect("lock poisoned") = Some(state);

        let (sender, receiver) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("dtnd-storage-writer".into())
            .spawn(move || writer_loop(receiver, shared))?;
        *writer = Some(WriterHandle { sender, handle });
        Ok(())
    }

    fn terminate(&self) -> StorageResult<()> {
        let handle = self.writer.lock().expect("lock poisoned").take();
        let Some(WriterHandle { sender, handle }) = handle else {
            return Ok(());
        };

        // Drain queued work before stopping; a failure at this point can
        // no longer be surfaced through wait(), so log it.
        if let Some(error) = self.shared.flush.drain() {
            warn!(error = %error, "deferred write failed during shutdown");
        }
        drop(sender);
        let _ = handle.join();

        *self.shared.state.write().expect("lock poisoned") = None;
        info!(root = %self.root.display(), "bundle storage stopped");
        Ok(())
    }

    fn persistent(&self) -> bool {
        true
    }

    fn store(&self, bundle: &Bundle) -> StorageResult<()> {
        if self.shared.faulty.load(Ordering::Relaxed) {
            return Ok(());
        }
        let bytes = Arc::new(dtnd_codec::encode(bundle)?);
        let meta = MetaBundle::of(bundle);
        let id = meta.id.clone();
        let path = bundle_path(&self.root, &id);
        let len = bytes.len() as u64;

        {
            let mut guard = self.shared.state.write().expect("lock poisoned");
            let state = guard.as_mut().ok_or(StorageError::NotStarted)?;
            let entry = IndexEntry::pending(meta, len, Location::File(path.clone()));
            if !state.index.insert(entry) {
                // Identity already stored; first write wins.
                return Ok(());
            }
            state.cache.insert(id.clone(), Arc::clone(&bytes));
        }

        debug!(%id, len, "bundle write queued");
        self.enqueue(Task::Write { id, path, bytes })
    }

    fn get(&self, id: &BundleId) -> StorageResult<Bundle> {
        if self.shared.faulty.load(Ordering::Relaxed) {
            return Err(StorageError::NoBundleFound);
        }
        let guard = self.shared.state.read().expect("lock poisoned");
        let state = guard.as_ref().ok_or(StorageError::NotStarted)?;
        let entry = state.index.get(id).ok_or(StorageError::NoBundleFound)?;
        let resident_secs = entry.stored_at.elapsed().as_secs();

        let bytes = match state.cache.get(id) {
            Some(bytes) => {
                let bytes = Arc::clone(bytes);
                drop(guard);
                bytes
            }
            None => {
                let Location::File(path) = entry.location.clone() else {
                    return Err(StorageError::NoBundleFound);
                };
                drop(guard);
                // The file may vanish under a racing removal; that is the
                // same outcome as losing the race on the index.
                match fs::read(&path) {
                    Ok(data) => Arc::new(data),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(StorageError::NoBundleFound)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let mut bundle = dtnd_codec::decode(&bytes)?;
        refresh_age(&mut bundle, resident_secs);
        Ok(bundle)
    }

    fn info(&self, id: &BundleId) -> StorageResult<MetaBundle> {
        let guard = self.shared.state.read().expect("lock poisoned");
        let state = guard.as_ref().ok_or(StorageError::NotStarted)?;
        state
            .index
            .get(id)
            .map(|e| e.meta.clone())
            .ok_or(StorageError::NoBundleFound)
    }

    fn contains(&self, id: &BundleId) -> bool {
        let guard = self.shared.state.read().expect("lock poisoned");
        guard.as_ref().map(|s| s.index.contains(id)).unwrap_or(false)
    }

    fn remove(&self, id: &BundleId) -> StorageResult<()> {
        let task = {
            let mut guard = self.shared.state.write().expect("lock poisoned");
            let state = guard.as_mut().ok_or(StorageError::NotStarted)?;
            let entry = state.index.remove(id).ok_or(StorageError::NoBundleFound)?;
            state.cache.remove(id);
            unlink_task(entry)
        };
        if let Some(task) = task {
            self.enqueue(task)?;
        }
        debug!(%id, "bundle removed");
        Ok(())
    }

    fn remove_matching(&self, filter: &BloomFilter) -> StorageResult<BundleId> {
        let (id, task) = {
            let mut guard = self.shared.state.write().expect("lock poisoned");
            let state = guard.as_mut().ok_or(StorageError::NotStarted)?;
            let id = state
                .index
                .first_matching(filter)
                .ok_or(StorageError::NoBundleFound)?;
            state.cache.remove(&id);
            let task = state.index.remove(&id).and_then(unlink_task);
            (id, task)
        };
        if let Some(task) = task {
            self.enqueue(task)?;
        }
        debug!(%id, "bundle removed by filter");
        Ok(id)
    }

    fn clear(&self) -> StorageResult<()> {
        let tasks: Vec<Task> = {
            let mut guard = self.shared.state.write().expect("lock poisoned");
            let state = guard.as_mut().ok_or(StorageError::NotStarted)?;
            state.cache.clear();
            state
                .index
                .drain()
                .into_iter()
                .filter_map(unlink_task)
                .collect()
        };
        for task in tasks {
            self.enqueue(task)?;
        }
        Ok(())
    }

    fn count(&self) -> u64 {
        let guard = self.shared.state.read().expect("lock poisoned");
        guard.as_ref().map(|s| s.index.count()).unwrap_or(0)
    }

    fn size(&self) -> u64 {
        let guard = self.shared.state.read().expect("lock poisoned");
        guard.as_ref().map(|s| s.index.total_bytes()).unwrap_or(0)
    }

    fn distinct_destinations(&self) -> BTreeSet<EndpointId> {
        let guard = self.shared.state.read().expect("lock poisoned");
        guard
            .as_ref()
            .map(|s| s.index.distinct_destinations())
            .unwrap_or_default()
    }

    fn query(
        &self,
        selector: &dyn BundleSelector,
        results: &mut Vec<MetaBundle>,
    ) -> StorageResult<()> {
        let guard = self.shared.state.read().expect("lock poisoned");
        match guard.as_ref() {
            Some(state) => run_query(&state.index, selector, results),
            None => Ok(()),
        }
    }

    fn release_custody(&self, custodian: &EndpointId, id: &BundleId) {
        debug!(%custodian, %id, "custody released");
    }

    fn expire(&self, now: DtnTime) -> StorageResult<()> {
        let tasks: Vec<Task> = {
            let mut guard = self.shared.state.write().expect("lock poisoned");
            let state = guard.as_mut().ok_or(StorageError::NotStarted)?;
            let expired = state.index.expired(now);
            if !expired.is_empty() {
                info!(evicted = expired.len(), %now, "expired bundles evicted");
            }
            expired
                .iter()
                .filter_map(|id| {
                    state.cache.remove(id);
                    state.index.remove(id).and_then(unlink_task)
                })
                .collect()
        };
        for task in tasks {
            self.enqueue(task)?;
        }
        Ok(())
    }

    fn wait(&self) -> StorageResult<()> {
        match self.shared.flush.drain() {
            Some(error) => Err(StorageError::WriteFailed(error)),
            None => Ok(()),
        }
    }

    fn set_faulty(&self, faulty: bool) {
        self.shared.faulty.store(faulty, Ordering::Relaxed);
    }
}

impl Drop for DiskBundleStorage {
    fn drop(&mut self) {
        // Stop the writer thread if the host forgot to terminate.
        let _ = self.terminate();
    }
}

impl std::fmt::Debug for DiskBundleStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBundleStorage")
            .field("root", &self.root)
            .field("count", &self.count())
            .finish()
    }
}

/// The unlink task for a removed entry, if it has a file location.
fn unlink_task(entry: IndexEntry) -> Option<Task> {
    match entry.location {
        Location::File(path) => Some(Task::Unlink { path }),
        Location::Resident => None,
    }
}

/// Deterministic file path for a bundle identity.
fn bundle_path(root: &Path, id: &BundleId) -> PathBuf {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dtnd-bundle-file-v1:");
    hasher.update(id.to_string().as_bytes());
    let digest = hasher.finalize();
    root.join(format!(
        "{}.{BUNDLE_EXTENSION}",
        hex::encode(digest.as_bytes())
    ))
}

/// Read a persisted file's metadata header and validate its length.
fn read_bundle_header(path: &Path) -> StorageResult<(MetaBundle, u64)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let (meta, total_len) = dtnd_codec::read_header(&mut reader)?;
    if file_len < total_len {
        return Err(StorageError::Codec(CodecError::Truncated {
            needed: total_len as usize,
            have: file_len as usize,
        }));
    }
    Ok((meta, total_len))
}

fn write_bundle_file(path: &Path, bytes: &[u8], sync_mode: SyncMode) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    if matches!(sync_mode, SyncMode::EveryWrite) {
        file.sync_all()?;
    }
    Ok(())
}

/// Background writer: drains the task queue until the sender is dropped.
fn writer_loop(receiver: Receiver<Task>, shared: Arc<Shared>) {
    while let Ok(task) = receiver.recv() {
        let error = match task {
            Task::Write { id, path, bytes } => {
                match write_bundle_file(&path, &bytes, shared.config.sync_mode) {
                    Ok(()) => {
                        let mut guard = shared.state.write().expect("lock poisoned");
                        if let Some(state) = guard.as_mut() {
                            state.index.mark_persisted(&id);
                            state.cache.remove(&id);
                        }
                        debug!(%id, path = %path.display(), "bundle flushed");
                        None
                    }
                    Err(e) => {
                        warn!(%id, error = %e, "bundle write failed");
                        Some(e.to_string())
                    }
                }
            }
            Task::Unlink { path } => match fs::remove_file(&path) {
                Ok(()) => None,
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "bundle unlink failed");
                    Some(e.to_string())
                }
            },
        };
        shared.flush.done(error);
    }
}
