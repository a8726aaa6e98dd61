//! Coverage watermarks. The merge is a single upsert using `LEAST` and
//! `GREATEST` so that concurrent workers can only widen the dense range,
//! never shrink it.

use eyre::{Context, Result};
use sea_orm::{ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter, Statement};

use polywatch_core::{Coverage, CoverageKind};

use crate::db::IndexerDb;

use super::generated::data_coverage;

impl IndexerDb {
    /// Widen the dense range for `kind` to include `[low, high]`.
    pub async fn merge_coverage(&self, kind: CoverageKind, low: u64, high: u64) -> Result<()> {
        self.0
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"INSERT INTO "data_coverage" ("kind", "low_water_mark", "high_water_mark")
                   VALUES ($1, $2, $3)
                   ON CONFLICT ("kind") DO UPDATE SET
                       "low_water_mark" = LEAST("data_coverage"."low_water_mark", "excluded"."low_water_mark"),
                       "high_water_mark" = GREATEST("data_coverage"."high_water_mark", "excluded"."high_water_mark"),
                       "last_analyzed_at" = NOW()"#,
                [kind.to_string().into(), (low as i64).into(), (high as i64).into()],
            ))
            .await
            .context("When merging coverage")?;
        Ok(())
    }

    /// Current dense range for `kind`, if any data has landed yet.
    pub async fn get_coverage(&self, kind: CoverageKind) -> Result<Option<Coverage>> {
        let row = data_coverage::Entity::find()
            .filter(data_coverage::Column::Kind.eq(kind.to_string()))
            .one(&self.0)
            .await
            .context("When querying coverage")?;
        Ok(row.map(|model| Coverage {
            kind,
            low_water_mark: model.low_water_mark as u64,
            high_water_mark: model.high_water_mark as u64,
        }))
    }
}
