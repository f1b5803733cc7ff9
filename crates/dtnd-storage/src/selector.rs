//! Selector queries: caller-supplied predicates over bundle metadata.

use dtnd_types::MetaBundle;

use crate::error::StorageResult;
use crate::index::BundleIndex;

/// Error raised by a selector predicate.
///
/// Aborts the whole query; results already appended to the caller's
/// collector stay visible (no rollback).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SelectorRejected(pub String);

/// A metadata predicate with a result cap.
///
/// The query engine calls [`should_add`](Self::should_add) for each indexed
/// metadata entry until the index is exhausted or
/// [`limit`](Self::limit) results have been collected. Selectors never see
/// payload bytes.
pub trait BundleSelector {
    /// Maximum number of results to collect.
    fn limit(&self) -> usize;

    /// Decide whether the given metadata belongs in the result set.
    fn should_add(&self, meta: &MetaBundle) -> Result<bool, SelectorRejected>;
}

/// Run a selector over an index, appending matches to `results`.
///
/// Iteration follows index order, which is deterministic for a fixed index
/// state. The candidate loop stops as soon as `limit` results have been
/// appended.
pub(crate) fn run_query(
    index: &BundleIndex,
    selector: &dyn BundleSelector,
    results: &mut Vec<MetaBundle>,
) -> StorageResult<()> {
    let limit = selector.limit();
    for meta in index.metas() {
        if results.len() >= limit {
            break;
        }
        if selector.should_add(meta)? {
            results.push(meta.clone());
        }
    }
    Ok(())
}
