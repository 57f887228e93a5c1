// Library crate for integration tests.
// main.rs wires these modules into the serve, worker and schedule commands.

pub mod ai;
pub mod artifacts;
pub mod browser;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flakiness;
pub mod ingest;
pub mod model;
pub mod queue;
pub mod routes;
pub mod schedule;
pub mod server;
pub mod settings;
pub mod state;
pub mod steps;
pub mod store;
pub mod worker;
