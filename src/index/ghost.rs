//! Sorted set of non-owned global node indices with logarithmic lookup.

use serde::{Deserialize, Serialize};

use crate::error::BlockVecError;

/// The global indices this rank shadows in its ghost buffer, sorted
/// ascending. Slot `j` of the ghost buffer corresponds to `indices()[j]`.
///
/// The set itself does not know the ownership partition; disjointness from
/// the owned range is checked when a distribution plan is built against it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostIndexSet {
    indices: Vec<i64>,
}

impl GhostIndexSet {
    /// Build from an arbitrary list of global indices. The list is sorted;
    /// negative or duplicate entries are rejected.
    pub fn new(mut indices: Vec<i64>) -> Result<Self, BlockVecError> {
        indices.sort_unstable();
        if let Some(&g) = indices.first() {
            if g < 0 {
                return Err(BlockVecError::IndexOutOfRange(g));
            }
        }
        if let Some(w) = indices.windows(2).find(|w| w[0] == w[1]) {
            return Err(BlockVecError::DuplicateGhostIndex(w[0]));
        }
        Ok(Self { indices })
    }

    /// Number of ghost nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The sorted global indices.
    #[inline]
    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    /// Ghost-buffer slot of global index `g`, or `None` if absent.
    #[inline]
    pub fn find_index(&self, g: i64) -> Option<usize> {
        self.indices.binary_search(&g).ok()
    }

    #[inline]
    pub fn contains(&self, g: i64) -> bool {
        self.find_index(g).is_some()
    }
}
