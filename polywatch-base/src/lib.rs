//! Shared framework for polywatch agents: settings loading, tracing and
//! metrics bootstrap, and the agent entrypoint/task-join plumbing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use agent::*;
pub use metrics::*;
pub use server::*;
pub use trace::*;

mod agent;
mod metrics;
mod server;
/// Layered configuration for agents.
pub mod settings;
mod trace;
