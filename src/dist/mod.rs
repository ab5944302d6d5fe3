//! Distribution layer: the exchange schedule and its per-vector context.

pub mod context;
pub mod plan;

pub use context::DistContext;
pub use plan::DistPlan;
