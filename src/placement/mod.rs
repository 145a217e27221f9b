//! Cluster model and placement engine.
//!
//! Workers run the [`PlacementEngine`] against a point-in-time snapshot of
//! the cluster's nodes:
//! - **Feasibility**: hard constraints (node class), then capacity, with
//!   memory compared against the declared ceiling when oversubscription is
//!   enabled.
//! - **Scoring**: binpack (least post-placement slack) or spread (fewest
//!   allocations of the same job), per the current configuration.
//! - **Preemption**: when nothing fits and the evaluation's scheduler class
//!   allows it, evict a minimal set of strictly lower-priority allocations.

pub mod cluster;
pub mod engine;

pub use cluster::{Allocation, ClusterCatalog, NodeCatalog, NodeSnapshot, Resources, TaskRequest};
pub use engine::{PlacementDenied, PlacementEngine, PlacementPlan};
