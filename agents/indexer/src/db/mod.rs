//! The durable store. All cross-worker coordination goes through these
//! methods; the atomic conditional updates in `gap.rs` are the system's only
//! concurrency-control mechanism.

use eyre::Result;
use sea_orm::{Database, DbConn};
use tracing::instrument;

pub use block::*;
pub use coverage::*;
pub use gap::*;
pub use milestone::*;
pub use reorg::*;

#[allow(clippy::all)]
mod generated;

// These modules implement additional functionality for the IndexerDb
mod block;
mod coverage;
mod gap;
mod milestone;
mod reorg;

#[derive(Clone, Debug)]
pub struct IndexerDb(DbConn);

impl IndexerDb {
    #[instrument]
    pub async fn connect(url: &str) -> Result<Self> {
        let db = Database::connect(url).await?;
        Ok(Self(db))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        use migration::MigratorTrait;
        migration::Migrator::up(&self.0, None).await?;
        Ok(())
    }
}
