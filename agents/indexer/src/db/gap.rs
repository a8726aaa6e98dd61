//! The gap registry. Claiming and shrinking go through conditional
//! `UPDATE .. WHERE status = ..` statements so that concurrent workers and
//! restarted processes can never fill the same range twice.

use eyre::{eyre, Context, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, Insert, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Statement,
};
use tracing::{debug, warn};

use polywatch_core::{Gap, GapKind, GapStats, GapStatus, WorkerId};

use crate::date_time;
use crate::db::IndexerDb;

use super::generated::gap;

fn gap_from_model(model: gap::Model) -> Result<Gap> {
    let kind: GapKind = model
        .gap_type
        .parse()
        .map_err(|_| eyre!("Unknown gap type in store: {}", model.gap_type))?;
    let status: GapStatus = model
        .status
        .parse()
        .map_err(|_| eyre!("Unknown gap status in store: {}", model.status))?;
    let source: WorkerId = model
        .source
        .parse()
        .map_err(|_| eyre!("Unknown gap source in store: {}", model.source))?;
    Ok(Gap {
        id: model.id,
        kind,
        start: model.start_value as u64,
        end: model.end_value as u64,
        source,
        status,
    })
}

impl IndexerDb {
    /// Record a missing range. Idempotent; a gap with the same identity
    /// (kind, start, end) is only recorded once no matter how many workers
    /// observe it. Returns whether a new row was written.
    pub async fn insert_gap(
        &self,
        kind: GapKind,
        start: u64,
        end: u64,
        source: WorkerId,
    ) -> Result<bool> {
        if start > end {
            return Ok(false);
        }
        let model = gap::ActiveModel {
            gap_type: Set(kind.to_string()),
            start_value: Set(start as i64),
            end_value: Set(end as i64),
            gap_size: Set((end - start + 1) as i64),
            source: Set(source.to_string()),
            status: Set(GapStatus::Pending.to_string()),
            ..Default::default()
        };
        let inserted = Insert::one(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::columns([
                    gap::Column::GapType,
                    gap::Column::StartValue,
                    gap::Column::EndValue,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.0)
            .await
            .context("When recording gap")?;
        if inserted > 0 {
            debug!(%kind, start, end, %source, "Recorded gap");
        }
        Ok(inserted > 0)
    }

    /// Pending gaps of one kind, newest range first.
    pub async fn pending_gaps(&self, kind: GapKind, limit: u64) -> Result<Vec<Gap>> {
        let models = gap::Entity::find()
            .filter(gap::Column::GapType.eq(kind.to_string()))
            .filter(gap::Column::Status.eq(GapStatus::Pending.to_string()))
            .order_by_desc(gap::Column::EndValue)
            .limit(limit)
            .all(&self.0)
            .await?;
        models.into_iter().map(gap_from_model).collect()
    }

    /// Try to take exclusive ownership of a pending gap. The conditional
    /// update succeeds for exactly one caller; everyone else sees zero rows
    /// affected and moves on.
    pub async fn claim_gap(&self, id: i64) -> Result<bool> {
        let claimed = gap::Entity::update_many()
            .col_expr(gap::Column::Status, Expr::value(GapStatus::Filling.to_string()))
            .filter(gap::Column::Id.eq(id))
            .filter(gap::Column::Status.eq(GapStatus::Pending.to_string()))
            .exec(&self.0)
            .await
            .context("When claiming gap")?;
        Ok(claimed.rows_affected == 1)
    }

    /// Shrink a claimed gap after a partial fill. A range that shrinks past
    /// empty is marked filled instead. Returns the status the gap ended up
    /// in.
    pub async fn shrink_gap(&self, id: i64, new_start: u64, new_end: u64) -> Result<GapStatus> {
        if new_start > new_end {
            self.mark_gap_filled(id).await?;
            return Ok(GapStatus::Filled);
        }
        let updated = gap::Entity::update_many()
            .col_expr(gap::Column::StartValue, Expr::value(new_start as i64))
            .col_expr(gap::Column::EndValue, Expr::value(new_end as i64))
            .col_expr(gap::Column::GapSize, Expr::value((new_end - new_start + 1) as i64))
            .filter(gap::Column::Id.eq(id))
            .filter(gap::Column::Status.eq(GapStatus::Filling.to_string()))
            .exec(&self.0)
            .await
            .context("When shrinking gap")?;
        if updated.rows_affected != 1 {
            warn!(gap = id, "Shrink of a gap not held in filling state");
        }
        Ok(GapStatus::Filling)
    }

    /// Mark a claimed gap fully drained.
    pub async fn mark_gap_filled(&self, id: i64) -> Result<()> {
        gap::Entity::update_many()
            .col_expr(gap::Column::Status, Expr::value(GapStatus::Filled.to_string()))
            .col_expr(gap::Column::FilledAt, Expr::value(Some(date_time::now())))
            .filter(gap::Column::Id.eq(id))
            .filter(gap::Column::Status.eq(GapStatus::Filling.to_string()))
            .exec(&self.0)
            .await
            .context("When marking gap filled")?;
        Ok(())
    }

    /// Hand a claimed gap back to the pending pool, e.g. after a fetch or
    /// store failure mid-fill.
    pub async fn release_gap(&self, id: i64) -> Result<()> {
        gap::Entity::update_many()
            .col_expr(gap::Column::Status, Expr::value(GapStatus::Pending.to_string()))
            .filter(gap::Column::Id.eq(id))
            .filter(gap::Column::Status.eq(GapStatus::Filling.to_string()))
            .exec(&self.0)
            .await
            .context("When releasing gap")?;
        Ok(())
    }

    /// Return every in-flight claim to the pending pool. Called once at
    /// startup: a gap still marked filling can only be a leftover from a
    /// process that died mid-fill, since claims do not survive restarts.
    pub async fn release_stale_gaps(&self) -> Result<u64> {
        let released = gap::Entity::update_many()
            .col_expr(gap::Column::Status, Expr::value(GapStatus::Pending.to_string()))
            .filter(gap::Column::Status.eq(GapStatus::Filling.to_string()))
            .exec(&self.0)
            .await
            .context("When releasing stale gaps")?;
        if released.rows_affected > 0 {
            warn!(
                gaps = released.rows_affected,
                "Released gaps stranded in filling state by an earlier run"
            );
        }
        Ok(released.rows_affected)
    }

    /// Paginated gap rows across all statuses, newest range first,
    /// optionally filtered by kind and status.
    pub async fn gaps_page(
        &self,
        page: u64,
        page_size: u64,
        kind: Option<GapKind>,
        status: Option<GapStatus>,
    ) -> Result<Vec<Gap>> {
        let mut query = gap::Entity::find().order_by_desc(gap::Column::EndValue);
        if let Some(kind) = kind {
            query = query.filter(gap::Column::GapType.eq(kind.to_string()));
        }
        if let Some(status) = status {
            query = query.filter(gap::Column::Status.eq(status.to_string()));
        }
        let models = query.paginate(&self.0, page_size).fetch_page(page).await?;
        models.into_iter().map(gap_from_model).collect()
    }

    /// Aggregate pending/filling counts for one gap kind.
    pub async fn gap_stats(&self, kind: GapKind) -> Result<GapStats> {
        let row = self
            .0
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"SELECT
                       COUNT(*) FILTER (WHERE "status" = 'pending') AS "pending_count",
                       COALESCE(SUM("gap_size") FILTER (WHERE "status" = 'pending'), 0)::BIGINT AS "pending_size",
                       COUNT(*) FILTER (WHERE "status" = 'filling') AS "filling_count"
                   FROM "gap"
                   WHERE "gap_type" = $1"#,
                [kind.to_string().into()],
            ))
            .await
            .context("When aggregating gap stats")?;
        let Some(row) = row else {
            return Ok(GapStats::default());
        };
        Ok(GapStats {
            pending_count: row.try_get::<i64>("", "pending_count")? as u64,
            pending_size: row.try_get::<i64>("", "pending_size")? as u64,
            filling_count: row.try_get::<i64>("", "filling_count")? as u64,
        })
    }
}
