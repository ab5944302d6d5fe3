//! Dependent ("virtual") nodes defined as weighted sums of real nodes.
//!
//! A dependent node has no global number of its own; callers address entry
//! `i` with the negative index `-i - 1` in `set_values`/`get_values`. Entry
//! `i` references parents `conn[ptr[i]..ptr[i+1]]` with matching weights.

use serde::{Deserialize, Serialize};

use crate::error::BlockVecError;
use crate::Scalar;

/// CSR-style table of dependent nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepNodeTable {
    ptr: Vec<usize>,
    conn: Vec<i64>,
    weights: Vec<Scalar>,
}

impl DepNodeTable {
    /// Build from raw CSR arrays. `ptr` must start at 0, be non-decreasing,
    /// and terminate at the common length of `conn` and `weights`.
    pub fn new(
        ptr: Vec<usize>,
        conn: Vec<i64>,
        weights: Vec<Scalar>,
    ) -> Result<Self, BlockVecError> {
        if ptr.first() != Some(&0) {
            return Err(BlockVecError::InvalidDepTable(
                "pointer array must start at 0".into(),
            ));
        }
        if ptr.windows(2).any(|w| w[1] < w[0]) {
            return Err(BlockVecError::InvalidDepTable(
                "pointer array must be non-decreasing".into(),
            ));
        }
        let total = *ptr.last().expect("ptr non-empty");
        if conn.len() != total || weights.len() != total {
            return Err(BlockVecError::InvalidDepTable(format!(
                "pointer terminates at {total} but conn has {} and weights {}",
                conn.len(),
                weights.len()
            )));
        }
        Ok(Self { ptr, conn, weights })
    }

    /// Number of dependent nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.ptr.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn ptr(&self) -> &[usize] {
        &self.ptr
    }

    #[inline]
    pub fn conn(&self) -> &[i64] {
        &self.conn
    }

    #[inline]
    pub fn weights(&self) -> &[Scalar] {
        &self.weights
    }

    /// Parents and weights of dependent node `i`.
    #[inline]
    pub fn row(&self, i: usize) -> (&[i64], &[Scalar]) {
        let span = self.ptr[i]..self.ptr[i + 1];
        (&self.conn[span.clone()], &self.weights[span])
    }

    /// The negative global index that addresses dependent node `i`.
    #[inline]
    pub fn global_index(&self, i: usize) -> i64 {
        -(i as i64) - 1
    }
}
