pub mod config;
pub mod dedup;
pub mod failures;
pub mod fetch;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod roster;
pub mod snapshot;
pub mod store;

pub use config::{Cli, Command, Settings};
pub use pipeline::{Pipeline, RunPhase, RunSummary};
