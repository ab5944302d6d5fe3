//! Unified error type for the block-vec public APIs.
//!
//! Collective routines report failures rank-locally: an error returned on one
//! rank does not unwind peers, so callers that continue calling collectives
//! after an error are on their own (the message-passing layer will eventually
//! deadlock or abort the job).

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for block-vec operations.
#[derive(Debug, Error)]
pub enum BlockVecError {
    /// Block size must be at least one scalar per node.
    #[error("block size must be positive")]
    InvalidBlockSize,
    /// Owner range must start at zero and be non-decreasing, with one entry
    /// per rank plus a terminator.
    #[error("invalid owner range: {0}")]
    InvalidOwnerRange(String),
    /// Peer vector (or output buffer) has a different length.
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// A non-owned, non-negative global index was not found in the ghost set.
    #[error("global index {0} is not in the ghost set")]
    GhostIndexNotFound(i64),
    /// Global index lies outside `[0, Nglobal)`.
    #[error("global index {0} is out of range")]
    IndexOutOfRange(i64),
    /// The ghost set contains the same global index twice.
    #[error("duplicate ghost index {0}")]
    DuplicateGhostIndex(i64),
    /// A ghost index falls inside this rank's owned range.
    #[error("ghost index {0} lies in the owned range of rank {1}")]
    GhostInOwnedRange(i64, usize),
    /// Negative-encoded dependent index decodes outside the table.
    #[error("dependent index {0} decodes outside the table of {1} entries")]
    DepIndexOutOfRange(i64, usize),
    /// Dependent-node table arrays are inconsistent.
    #[error("malformed dependent-node table: {0}")]
    InvalidDepTable(String),
    /// A dependent parent is neither owned nor ghosted on this rank.
    #[error("dependent parent {parent} is neither owned nor ghosted on rank {rank}")]
    DanglingDepParent { parent: i64, rank: usize },
    /// Dirichlet record carries values whose length differs from its DOF list.
    #[error("boundary condition lists {dofs} dofs but {values} values")]
    BcValueLenMismatch { dofs: usize, values: usize },
    /// Dirichlet record names a DOF outside the block.
    #[error("boundary condition dof {dof} exceeds block size {bsize}")]
    BcDofOutOfRange { dof: usize, bsize: usize },
    /// `begin_*`/`end_*` called out of order on a vector or context.
    #[error("exchange phase mismatch: expected {expected}, found {found}")]
    PhaseMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// A point-to-point operation with a peer failed or returned short data.
    #[error("communication with rank {neighbor} failed: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// Received payload length differs from the posted receive.
    #[error("buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Total scalar count does not fit the file header.
    #[error("vector of {0} scalars does not fit a 32-bit file header")]
    HeaderOverflow(usize),
    /// Stored length in the file header disagrees with the vector layout.
    #[error("file {path}: stored length {found} does not match vector length {expected}")]
    FileLengthMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    /// Underlying I/O failure.
    #[error("i/o failure on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BlockVecError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BlockVecError::Io {
            path: path.into(),
            source,
        }
    }
}
