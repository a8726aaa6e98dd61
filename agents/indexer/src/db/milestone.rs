use eyre::{eyre, Context, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, FromQueryResult, Insert, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use tracing::debug;

use polywatch_core::{h256_to_hex, hex_to_h256, Milestone};

use crate::date_time;
use crate::db::IndexerDb;

use super::generated::milestone;

/// A stored milestone row as exposed to read accessors.
pub type MilestoneRecord = milestone::Model;

#[derive(FromQueryResult)]
struct ExtremeValue {
    value: Option<i64>,
}

fn milestone_from_model(model: milestone::Model) -> Result<Milestone> {
    let hash = hex_to_h256(&model.hash)
        .ok_or_else(|| eyre!("Malformed milestone hash in store: {}", model.hash))?;
    Ok(Milestone {
        sequence_id: model.sequence_id as u64,
        milestone_id: model.milestone_id,
        start_block: model.start_block as u64,
        end_block: model.end_block as u64,
        hash,
        proposer: model.proposer,
        timestamp: date_time::to_unix_timestamp_s(model.timestamp),
    })
}

impl IndexerDb {
    /// Upsert milestones keyed by sequence number. Replays are harmless
    /// since attestation content for a sequence number never changes.
    pub async fn store_milestones(&self, milestones: &[Milestone]) -> Result<u64> {
        if milestones.is_empty() {
            return Ok(0);
        }
        let models = milestones
            .iter()
            .map(|m| milestone::ActiveModel {
                sequence_id: Set(m.sequence_id as i64),
                milestone_id: Set(m.milestone_id.clone()),
                start_block: Set(m.start_block as i64),
                end_block: Set(m.end_block as i64),
                hash: Set(h256_to_hex(&m.hash)),
                proposer: Set(m.proposer.clone()),
                timestamp: Set(date_time::from_unix_timestamp_s(m.timestamp)),
            })
            .collect::<Vec<_>>();

        debug!(milestones = models.len(), "Writing milestones to database");
        Insert::many(models)
            .on_conflict(
                OnConflict::column(milestone::Column::SequenceId)
                    .update_columns([
                        milestone::Column::MilestoneId,
                        milestone::Column::StartBlock,
                        milestone::Column::EndBlock,
                        milestone::Column::Hash,
                        milestone::Column::Proposer,
                        milestone::Column::Timestamp,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.0)
            .await
            .context("When storing milestones")?;
        Ok(milestones.len() as u64)
    }

    /// Highest stored sequence number; the milestone cursor recovery point.
    pub async fn latest_sequence_id(&self) -> Result<Option<u64>> {
        let row = milestone::Entity::find()
            .select_only()
            .column_as(milestone::Column::SequenceId.max(), "value")
            .into_model::<ExtremeValue>()
            .one(&self.0)
            .await?;
        Ok(row.and_then(|r| r.value).map(|v| v as u64))
    }

    /// Lowest stored sequence number.
    pub async fn earliest_sequence_id(&self) -> Result<Option<u64>> {
        let row = milestone::Entity::find()
            .select_only()
            .column_as(milestone::Column::SequenceId.min(), "value")
            .into_model::<ExtremeValue>()
            .one(&self.0)
            .await?;
        Ok(row.and_then(|r| r.value).map(|v| v as u64))
    }

    /// One stored milestone by sequence number.
    pub async fn milestone_at(&self, sequence_id: u64) -> Result<Option<Milestone>> {
        let model = milestone::Entity::find_by_id(sequence_id as i64)
            .one(&self.0)
            .await
            .context("When querying milestone")?;
        model.map(milestone_from_model).transpose()
    }

    /// Stored milestones whose block ranges intersect `[start, end]`,
    /// ordered by sequence number.
    pub async fn milestones_covering(&self, start: u64, end: u64) -> Result<Vec<Milestone>> {
        let models = milestone::Entity::find()
            .filter(milestone::Column::StartBlock.lte(end as i64))
            .filter(milestone::Column::EndBlock.gte(start as i64))
            .order_by_asc(milestone::Column::SequenceId)
            .all(&self.0)
            .await
            .context("When querying covering milestones")?;
        models.into_iter().map(milestone_from_model).collect()
    }

    /// Paginated milestone rows, newest first.
    pub async fn milestones_page(&self, page: u64, page_size: u64) -> Result<Vec<MilestoneRecord>> {
        let rows = milestone::Entity::find()
            .order_by_desc(milestone::Column::SequenceId)
            .paginate(&self.0, page_size)
            .fetch_page(page)
            .await?;
        Ok(rows)
    }
}
