use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataCoverage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DataCoverage::Kind)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DataCoverage::LowWaterMark)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DataCoverage::HighWaterMark)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DataCoverage::LastAnalyzedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DataCoverage::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum DataCoverage {
    Table,
    /// Identity space the marks describe, one row per kind
    Kind,
    /// Lowest identity known densely covered; only ever decreases
    LowWaterMark,
    /// Highest identity known densely covered; only ever increases
    HighWaterMark,
    /// Last time a writer touched the row
    LastAnalyzedAt,
}
