//! SeaORM entities for the indexer schema. Kept in the shape `sea-orm-cli
//! generate entity` produces.

pub mod block;
pub mod data_coverage;
pub mod gap;
pub mod milestone;
pub mod reorg;
