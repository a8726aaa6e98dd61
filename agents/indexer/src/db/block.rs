use eyre::{Context, Result};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbBackend, DbErr, EntityTrait, FromQueryResult,
    Insert, PaginatorTrait, QueryFilter, QueryOrder, QueryResult, QuerySelect, Statement,
};
use tracing::{debug, trace};

use polywatch_core::{h256_to_hex, hex_to_h256, BlockInfo, FeeStats, Milestone, H256};

use crate::date_time;
use crate::db::IndexerDb;

use super::generated::block;

/// A stored block row as exposed to read accessors.
pub type BlockRecord = block::Model;

const STORE_BLOCK_CHUNK_SIZE: usize = 100;

/// The stripped down block data needed for reorg checks and derived-metric
/// computation.
#[derive(Debug, Clone)]
pub struct BlockMeta {
    pub number: u64,
    pub hash: H256,
    pub timestamp: u64,
}

impl FromQueryResult for BlockMeta {
    fn from_query_result(res: &QueryResult, pre: &str) -> std::result::Result<Self, DbErr> {
        let raw_hash = res.try_get::<String>(pre, "hash")?;
        let hash = hex_to_h256(&raw_hash)
            .ok_or_else(|| DbErr::Custom(format!("Malformed block hash in store: {raw_hash}")))?;
        Ok(Self {
            number: res.try_get::<i64>(pre, "block_number")? as u64,
            hash,
            timestamp: date_time::to_unix_timestamp_s(
                res.try_get::<sea_orm::prelude::TimeDateTime>(pre, "timestamp")?,
            ),
        })
    }
}

#[derive(FromQueryResult)]
struct ExtremeValue {
    value: Option<i64>,
}

/// A block still waiting for receipt enrichment.
#[derive(Debug, Clone, FromQueryResult)]
pub struct UnenrichedBlock {
    pub block_number: i64,
    pub base_fee_gwei: f64,
}

impl IndexerDb {
    /// Upsert blocks keyed by block number.
    ///
    /// Replays overwrite with equal data, except the nullable fee-stat pair
    /// which only upgrades null to non-null, and the finality columns which
    /// are never touched here (a replayed raw insert must not regress a
    /// stamped row; reorg overwrites reset finality explicitly first).
    pub async fn store_blocks(&self, blocks: &[BlockInfo]) -> Result<u64> {
        if blocks.is_empty() {
            return Ok(0);
        }
        let models = blocks
            .iter()
            .map(|info| block::ActiveModel {
                block_number: Set(info.number as i64),
                timestamp: Set(date_time::from_unix_timestamp_s(info.timestamp)),
                hash: Set(h256_to_hex(&info.hash)),
                parent_hash: Set(h256_to_hex(&info.parent_hash)),
                gas_used: Set(info.gas_used as i64),
                gas_limit: Set(info.gas_limit as i64),
                base_fee_gwei: Set(info.base_fee_gwei),
                min_priority_fee_gwei: Set(info.fees.min_priority_fee_gwei),
                max_priority_fee_gwei: Set(info.fees.max_priority_fee_gwei),
                median_priority_fee_gwei: Set(info.fees.median_priority_fee_gwei),
                avg_priority_fee_gwei: Set(info.fees.avg_priority_fee_gwei),
                total_priority_fees_gwei: Set(info.fees.total_priority_fees_gwei),
                tx_count: Set(info.tx_count as i32),
                block_time_sec: Set(info.block_time_sec),
                mgas_per_sec: Set(info.mgas_per_sec),
                tps: Set(info.tps),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        debug!(blocks = models.len(), "Writing blocks to database");
        trace!(?models, "Writing blocks to database");
        for chunk in models.chunks(STORE_BLOCK_CHUNK_SIZE) {
            Insert::many(chunk.to_vec())
                .on_conflict(
                    OnConflict::column(block::Column::BlockNumber)
                        .update_columns([
                            block::Column::Timestamp,
                            block::Column::Hash,
                            block::Column::ParentHash,
                            block::Column::GasUsed,
                            block::Column::GasLimit,
                            block::Column::BaseFeeGwei,
                            block::Column::MinPriorityFeeGwei,
                            block::Column::MaxPriorityFeeGwei,
                            block::Column::MedianPriorityFeeGwei,
                            block::Column::TxCount,
                            block::Column::BlockTimeSec,
                            block::Column::MgasPerSec,
                            block::Column::Tps,
                        ])
                        .value(
                            block::Column::AvgPriorityFeeGwei,
                            Expr::cust(
                                r#"COALESCE("excluded"."avg_priority_fee_gwei", "block"."avg_priority_fee_gwei")"#,
                            ),
                        )
                        .value(
                            block::Column::TotalPriorityFeesGwei,
                            Expr::cust(
                                r#"COALESCE("excluded"."total_priority_fees_gwei", "block"."total_priority_fees_gwei")"#,
                            ),
                        )
                        .to_owned(),
                )
                .exec_without_returning(&self.0)
                .await
                .context("When storing blocks")?;
        }
        Ok(blocks.len() as u64)
    }

    /// Highest stored block number; the live cursor recovery point.
    pub async fn latest_block_number(&self) -> Result<Option<u64>> {
        let row = block::Entity::find()
            .select_only()
            .column_as(block::Column::BlockNumber.max(), "value")
            .into_model::<ExtremeValue>()
            .one(&self.0)
            .await?;
        Ok(row.and_then(|r| r.value).map(|v| v as u64))
    }

    /// Lowest stored block number; the backfill cursor recovery point.
    pub async fn earliest_block_number(&self) -> Result<Option<u64>> {
        let row = block::Entity::find()
            .select_only()
            .column_as(block::Column::BlockNumber.min(), "value")
            .into_model::<ExtremeValue>()
            .one(&self.0)
            .await?;
        Ok(row.and_then(|r| r.value).map(|v| v as u64))
    }

    /// Hash and timestamp of one stored block, if present.
    pub async fn block_meta(&self, number: u64) -> Result<Option<BlockMeta>> {
        let meta = block::Entity::find()
            .filter(block::Column::BlockNumber.eq(number as i64))
            .select_only()
            .column_as(block::Column::BlockNumber, "block_number")
            .column_as(block::Column::Hash, "hash")
            .column_as(block::Column::Timestamp, "timestamp")
            .into_model::<BlockMeta>()
            .one(&self.0)
            .await
            .context("When querying block meta")?;
        Ok(meta)
    }

    /// Stamp finality onto every unfinalized block in the milestone's
    /// range. Returns how many rows were stamped.
    pub async fn stamp_finality(&self, milestone: &Milestone) -> Result<u64> {
        let stamped = self
            .0
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"UPDATE "block"
                   SET "finalized" = TRUE,
                       "finalized_at" = $1,
                       "milestone_id" = $2,
                       "time_to_finality_sec" = EXTRACT(EPOCH FROM ($1 - "timestamp"))
                   WHERE "block_number" BETWEEN $3 AND $4
                     AND "finalized" = FALSE"#,
                [
                    date_time::from_unix_timestamp_s(milestone.timestamp).into(),
                    milestone.milestone_id.clone().into(),
                    (milestone.start_block as i64).into(),
                    (milestone.end_block as i64).into(),
                ],
            ))
            .await
            .context("When stamping finality")?;
        Ok(stamped.rows_affected())
    }

    /// Safety-net pass: stamp any unfinalized block already covered by a
    /// stored milestone range. Returns how many rows were fixed.
    pub async fn reconcile_finality(&self) -> Result<u64> {
        let fixed = self
            .0
            .execute(Statement::from_string(
                DbBackend::Postgres,
                r#"UPDATE "block" AS b
                   SET "finalized" = TRUE,
                       "finalized_at" = m."timestamp",
                       "milestone_id" = m."milestone_id",
                       "time_to_finality_sec" = EXTRACT(EPOCH FROM (m."timestamp" - b."timestamp"))
                   FROM "milestone" AS m
                   WHERE b."finalized" = FALSE
                     AND b."block_number" BETWEEN m."start_block" AND m."end_block""#,
            ))
            .await
            .context("When reconciling finality")?;
        Ok(fixed.rows_affected())
    }

    /// Reset finality for a range about to be overwritten with canonical
    /// blocks after a reorg.
    pub async fn reset_finality(&self, start: u64, end: u64) -> Result<u64> {
        let reset = block::Entity::update_many()
            .col_expr(block::Column::Finalized, Expr::value(false))
            .col_expr(block::Column::FinalizedAt, Expr::value(Option::<sea_orm::prelude::TimeDateTime>::None))
            .col_expr(block::Column::MilestoneId, Expr::value(Option::<String>::None))
            .col_expr(block::Column::TimeToFinalitySec, Expr::value(Option::<f64>::None))
            .filter(block::Column::BlockNumber.between(start as i64, end as i64))
            .exec(&self.0)
            .await
            .context("When resetting finality")?;
        Ok(reset.rows_affected)
    }

    /// Update the receipt-derived fee stats of one block.
    pub async fn update_fee_stats(&self, number: u64, fees: &FeeStats) -> Result<()> {
        block::Entity::update_many()
            .col_expr(block::Column::MinPriorityFeeGwei, Expr::value(fees.min_priority_fee_gwei))
            .col_expr(block::Column::MaxPriorityFeeGwei, Expr::value(fees.max_priority_fee_gwei))
            .col_expr(
                block::Column::MedianPriorityFeeGwei,
                Expr::value(fees.median_priority_fee_gwei),
            )
            .col_expr(block::Column::AvgPriorityFeeGwei, Expr::value(fees.avg_priority_fee_gwei))
            .col_expr(
                block::Column::TotalPriorityFeesGwei,
                Expr::value(fees.total_priority_fees_gwei),
            )
            .filter(block::Column::BlockNumber.eq(number as i64))
            .exec(&self.0)
            .await
            .context("When updating fee stats")?;
        Ok(())
    }

    /// Blocks in the range whose receipt enrichment is still pending.
    pub async fn unenriched_blocks_in_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<UnenrichedBlock>> {
        let rows = block::Entity::find()
            .filter(block::Column::BlockNumber.between(start as i64, end as i64))
            .filter(block::Column::AvgPriorityFeeGwei.is_null())
            .select_only()
            .column(block::Column::BlockNumber)
            .column(block::Column::BaseFeeGwei)
            .order_by_asc(block::Column::BlockNumber)
            .into_model::<UnenrichedBlock>()
            .all(&self.0)
            .await?;
        Ok(rows)
    }

    /// How many blocks exist in the inclusive range.
    pub async fn count_blocks_in_range(&self, start: u64, end: u64) -> Result<u64> {
        let count = block::Entity::find()
            .filter(block::Column::BlockNumber.between(start as i64, end as i64))
            .count(&self.0)
            .await?;
        Ok(count)
    }

    /// How many finalized blocks exist in the inclusive range.
    pub async fn count_finalized_in_range(&self, start: u64, end: u64) -> Result<u64> {
        let count = block::Entity::find()
            .filter(block::Column::BlockNumber.between(start as i64, end as i64))
            .filter(block::Column::Finalized.eq(true))
            .count(&self.0)
            .await?;
        Ok(count)
    }

    /// Paginated block rows, newest first, optionally bounded by height.
    pub async fn blocks_page(
        &self,
        page: u64,
        page_size: u64,
        min_number: Option<u64>,
        max_number: Option<u64>,
    ) -> Result<Vec<BlockRecord>> {
        let mut query = block::Entity::find().order_by_desc(block::Column::BlockNumber);
        if let Some(min) = min_number {
            query = query.filter(block::Column::BlockNumber.gte(min as i64));
        }
        if let Some(max) = max_number {
            query = query.filter(block::Column::BlockNumber.lte(max as i64));
        }
        let rows = query.paginate(&self.0, page_size).fetch_page(page).await?;
        Ok(rows)
    }
}
