//! Index structures: the ownership partition, the ghost index set, and the
//! dependent-node table.

pub mod dep_nodes;
pub mod ghost;
pub mod owner_map;

pub use dep_nodes::DepNodeTable;
pub use ghost::GhostIndexSet;
pub use owner_map::OwnerMap;
