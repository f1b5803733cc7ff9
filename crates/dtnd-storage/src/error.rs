use std::io;

use dtnd_codec::CodecError;

use crate::selector::SelectorRejected;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested bundle is not in the storage.
    ///
    /// This is a normal outcome for `get` after expiry, for removal of an
    /// unknown identity, and for bloom-filter draining, where it is the
    /// loop-termination signal.
    #[error("no bundle found")]
    NoBundleFound,

    /// A selector predicate aborted an in-progress query.
    #[error("selector rejected: {0}")]
    Selector(#[from] SelectorRejected),

    /// I/O error from the backing storage location.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A persisted or cached frame failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A deferred write failed in the background; reported by `wait()`.
    #[error("background write failed: {0}")]
    WriteFailed(String),

    /// The storage has not been started (or was terminated).
    #[error("storage is not started")]
    NotStarted,
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
