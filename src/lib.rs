pub mod admission;
pub mod broker;
pub mod config;
pub mod error;
pub mod placement;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod worker;
