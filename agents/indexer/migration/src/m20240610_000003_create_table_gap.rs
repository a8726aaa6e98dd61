use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Gap::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Gap::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Gap::GapType).text().not_null())
                    .col(ColumnDef::new(Gap::StartValue).big_integer().not_null())
                    .col(ColumnDef::new(Gap::EndValue).big_integer().not_null())
                    .col(ColumnDef::new(Gap::GapSize).big_integer().not_null())
                    .col(ColumnDef::new(Gap::Source).text().not_null())
                    .col(
                        ColumnDef::new(Gap::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Gap::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .col(ColumnDef::new(Gap::FilledAt).timestamp())
                    // Registration is idempotent: re-registering an identical
                    // range must be a no-op.
                    .index(
                        Index::create()
                            .name("gap_identity_uniq")
                            .col(Gap::GapType)
                            .col(Gap::StartValue)
                            .col(Gap::EndValue)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Gap::Table)
                    .name("gap_type_status_idx")
                    .col(Gap::GapType)
                    .col(Gap::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Gap::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Gap {
    Table,
    /// Unique database id; the claim key
    Id,
    /// Data kind the range refers to
    GapType,
    /// First missing identity, advances as the gap is drained
    StartValue,
    /// Last missing identity, inclusive
    EndValue,
    /// Identities still missing, kept in step with the range on shrink
    GapSize,
    /// Worker that registered the gap
    Source,
    /// pending, filling or filled
    Status,
    /// Registration time
    CreatedAt,
    /// When the gap was fully drained
    FilledAt,
}
