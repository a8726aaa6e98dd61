use eyre::{Context, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, Insert, PaginatorTrait, QueryFilter, QueryOrder,
};
use tracing::info;

use polywatch_core::{h256_to_hex, ReorgRecord, H256};

use crate::date_time;
use crate::db::IndexerDb;

use super::generated::reorg;

/// A stored reorg audit row as exposed to read accessors.
pub type ReorgRow = reorg::Model;

impl IndexerDb {
    /// Append audit entries for orphaned blocks. Never updated in place
    /// except to fill in the replacement hash once known.
    pub async fn record_reorgs(&self, records: &[ReorgRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let models = records
            .iter()
            .map(|r| reorg::ActiveModel {
                block_number: Set(r.block_number as i64),
                old_hash: Set(h256_to_hex(&r.old_hash)),
                block_timestamp: Set(date_time::from_unix_timestamp_s(r.timestamp)),
                reason: Set(r.reason.to_string()),
                replaced_by_hash: Set(r.replaced_by_hash.as_ref().map(h256_to_hex)),
                ..Default::default()
            })
            .collect::<Vec<_>>();
        info!(reorgs = models.len(), "Recording orphaned blocks");
        Insert::many(models)
            .exec_without_returning(&self.0)
            .await
            .context("When recording reorgs")?;
        Ok(records.len() as u64)
    }

    /// Fill in the canonical replacement hash for a recorded orphan once
    /// the overwrite has landed.
    pub async fn set_replaced_by(
        &self,
        block_number: u64,
        old_hash: &H256,
        new_hash: &H256,
    ) -> Result<()> {
        reorg::Entity::update_many()
            .col_expr(
                reorg::Column::ReplacedByHash,
                Expr::value(Some(h256_to_hex(new_hash))),
            )
            .filter(reorg::Column::BlockNumber.eq(block_number as i64))
            .filter(reorg::Column::OldHash.eq(h256_to_hex(old_hash)))
            .filter(reorg::Column::ReplacedByHash.is_null())
            .exec(&self.0)
            .await
            .context("When updating reorg replacement hash")?;
        Ok(())
    }

    /// Paginated reorg audit rows, most recent first.
    pub async fn reorgs_page(&self, page: u64, page_size: u64) -> Result<Vec<ReorgRow>> {
        let rows = reorg::Entity::find()
            .order_by_desc(reorg::Column::ReorgedAt)
            .paginate(&self.0, page_size)
            .fetch_page(page)
            .await?;
        Ok(rows)
    }
}
