//! Append-only record of Dirichlet boundary conditions.
//!
//! Each record pins a subset of one node's degrees of freedom. Storage is
//! three flat arrays: parallel `local`/`global` node numbers, a ragged
//! offset array `var_ptr`, and tight `dofs`/`values` arrays. The stored
//! values are consumed by matrix and residual routines; applying the map to
//! a vector always writes zeros (see [`crate::vec::BlockVec::apply_bcs`]).

use serde::{Deserialize, Serialize};

use crate::error::BlockVecError;
use crate::Scalar;

/// Compact list of Dirichlet constraints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BcMap {
    local: Vec<i64>,
    global: Vec<i64>,
    var_ptr: Vec<usize>,
    dofs: Vec<usize>,
    values: Vec<Scalar>,
}

impl Default for BcMap {
    fn default() -> Self {
        Self::new()
    }
}

impl BcMap {
    pub fn new() -> Self {
        Self {
            local: Vec::new(),
            global: Vec::new(),
            var_ptr: vec![0],
            dofs: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Reserve for an estimated number of records, assuming a handful of
    /// constrained DOFs per node.
    pub fn with_capacity(nbcs: usize) -> Self {
        let mut map = Self::new();
        map.local.reserve(nbcs);
        map.global.reserve(nbcs);
        map.var_ptr.reserve(nbcs);
        map.dofs.reserve(8 * nbcs);
        map.values.reserve(8 * nbcs);
        map
    }

    /// Append one record. `values` of `None` pins the listed DOFs to zero;
    /// otherwise it must be as long as `dofs`.
    pub fn add_bc(
        &mut self,
        local_node: i64,
        global_node: i64,
        dofs: &[usize],
        values: Option<&[Scalar]>,
    ) -> Result<(), BlockVecError> {
        if let Some(vals) = values {
            if vals.len() != dofs.len() {
                return Err(BlockVecError::BcValueLenMismatch {
                    dofs: dofs.len(),
                    values: vals.len(),
                });
            }
        }
        self.local.push(local_node);
        self.global.push(global_node);
        self.dofs.extend_from_slice(dofs);
        match values {
            Some(vals) => self.values.extend_from_slice(vals),
            None => self.values.extend(std::iter::repeat(0.0).take(dofs.len())),
        }
        let last = *self.var_ptr.last().expect("var_ptr non-empty");
        self.var_ptr.push(last + dofs.len());
        Ok(())
    }

    /// Number of records.
    #[inline]
    pub fn len(&self) -> usize {
        self.local.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    #[inline]
    pub fn local_nodes(&self) -> &[i64] {
        &self.local
    }

    #[inline]
    pub fn global_nodes(&self) -> &[i64] {
        &self.global
    }

    #[inline]
    pub fn var_ptr(&self) -> &[usize] {
        &self.var_ptr
    }

    #[inline]
    pub fn dof_indices(&self) -> &[usize] {
        &self.dofs
    }

    #[inline]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    /// Iterate over the records.
    pub fn iter(&self) -> impl Iterator<Item = BcRecord<'_>> + '_ {
        (0..self.len()).map(move |i| {
            let span = self.var_ptr[i]..self.var_ptr[i + 1];
            BcRecord {
                local: self.local[i],
                global: self.global[i],
                dofs: &self.dofs[span.clone()],
                values: &self.values[span],
            }
        })
    }
}

/// Borrowed view of one Dirichlet record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BcRecord<'a> {
    pub local: i64,
    pub global: i64,
    pub dofs: &'a [usize],
    pub values: &'a [Scalar],
}
