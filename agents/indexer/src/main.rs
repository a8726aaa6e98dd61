//! The polywatch indexer. Ingests blocks and finality attestations into a
//! Postgres store, keeps the data gap-free through a registry of missing
//! ranges, and reconciles the two streams into per-block finality.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;

use polywatch_base::agent_main;

use crate::agent::Indexer;

mod agent;
mod date_time;
mod db;
mod enrich;
mod settings;
mod workers;

#[tokio::main]
async fn main() -> Result<()> {
    agent_main::<Indexer>().await
}
