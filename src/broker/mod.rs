//! Evaluation queue with lease/ack/nack semantics.
//!
//! Evaluations flow Pending -> Leased -> {Complete | Pending (requeued) |
//! Blocked | Failed}. The broker owns the only mutable shared state in the
//! processing loop: the class-partitioned pending sets and the in-flight
//! lease table. Every entry point takes one internal critical section, so
//! workers never observe a torn state.

pub mod broker;
pub mod eval;

pub use broker::{BlockOutcome, BrokerStats, EvalBroker, LeaseToken};
pub use eval::{EvalStatus, Evaluation};
