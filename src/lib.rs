//! # block-vec
//!
//! block-vec is a Rust library for the distributed block vectors at the core
//! of parallel finite-element solvers. A vector is partitioned across the
//! ranks of a message-passing communicator, stores one fixed-size block of
//! scalars per node, and supports the algebra needed by iterative solvers
//! (norm, dot, scaled accumulation) together with the gather/scatter and
//! dependent-node protocols that make element assembly correct across rank
//! boundaries.
//!
//! ## Features
//! - Owned/ghost/dependent storage regions with a strict owner-range
//!   partition and negative-index addressing for dependent nodes
//! - Two-phase assembly (ghosts combine into owners) and distribution
//!   (owners broadcast to ghosts, dependents re-evaluated) exchanges
//! - Pluggable communication backends (serial, threaded, MPI) behind one
//!   `Communicator` trait
//! - Dirichlet boundary-condition records and their application
//! - Deterministic parallel random fill and rank-count-independent file I/O
//!
//! ## Usage
//! Add `block-vec` as a dependency and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! block-vec = "0.1"
//! # Optional: features = ["mpi-support"]
//! ```
//!
//! Collective routines must be called on every rank of the communicator in
//! the same global order; see the method docs on [`vec::BlockVec`].

pub mod bc;
pub mod comm;
pub mod dist;
pub mod error;
pub mod index;
pub mod vec;

/// Scalar type carried by every vector entry.
pub type Scalar = f64;

/// A convenient prelude for the most-used types.
pub mod prelude {
    pub use crate::bc::{BcMap, BcRecord};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::communicator::MpiComm;
    pub use crate::comm::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
    pub use crate::dist::{DistContext, DistPlan};
    pub use crate::error::BlockVecError;
    pub use crate::index::{DepNodeTable, GhostIndexSet, OwnerMap};
    pub use crate::vec::{AssemblyOp, BlockVec};
    pub use crate::Scalar;
}
