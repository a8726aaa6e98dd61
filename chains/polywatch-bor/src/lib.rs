//! Upstream clients for a Bor-style execution chain and its Heimdall-style
//! milestone api.
//!
//! Both clients bundle several endpoints behind a
//! [`polywatch_core::rpc_clients::FallbackProvider`] with a per-endpoint
//! circuit breaker; batch fetches fan out per item and report partial
//! failure through [`polywatch_core::BatchResult`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use heimdall::HeimdallClient;
pub use rpc::{BorClient, ClientConf};

mod convert;
mod heimdall;
mod rpc;
