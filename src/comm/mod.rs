//! Communication layer: the `Communicator` trait, its backends, and the
//! collectives and wire helpers built on top of it.

pub mod collective;
pub mod communicator;
pub mod wire;

pub use collective::{allgather_u64, allreduce_sum, broadcast_bytes};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
pub use communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
