//! Scheduling workers.
//!
//! Each worker runs an independent sequential loop:
//!
//! 1. Lease an evaluation from the [`EvalBroker`](crate::broker::EvalBroker)
//!    (the only blocking point in the loop)
//! 2. Snapshot the cluster and run the
//!    [`PlacementEngine`](crate::placement::PlacementEngine)
//! 3. Apply the plan and ack, or nack/block on failure
//!
//! Shutdown is observed at the dequeue point; a placement already in flight
//! finishes and resolves its lease first, so cancellation never orphans one.

pub mod pool;

pub use pool::WorkerPool;
