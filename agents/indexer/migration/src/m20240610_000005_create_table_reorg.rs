use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reorg::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reorg::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Reorg::BlockNumber).big_integer().not_null())
                    .col(ColumnDef::new(Reorg::OldHash).text().not_null())
                    .col(
                        ColumnDef::new(Reorg::BlockTimestamp)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Reorg::ReorgedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .col(ColumnDef::new(Reorg::Reason).text().not_null())
                    .col(ColumnDef::new(Reorg::ReplacedByHash).text())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Reorg::Table)
                    .name("reorg_block_number_idx")
                    .col(Reorg::BlockNumber)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Reorg::Table)
                    .name("reorg_reorged_at_idx")
                    .col(Reorg::ReorgedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Reorg::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Reorg {
    Table,
    /// Unique database id
    Id,
    /// Height of the orphaned block
    BlockNumber,
    /// The hash that was stored and is now orphaned
    OldHash,
    /// The orphaned block's own timestamp
    BlockTimestamp,
    /// When the reorg was detected
    ReorgedAt,
    /// Detection reason
    Reason,
    /// Canonical replacement hash, once known
    ReplacedByHash,
}
