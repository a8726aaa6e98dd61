use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Block::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Block::BlockNumber)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Block::Timestamp).timestamp().not_null())
                    .col(ColumnDef::new(Block::Hash).text().not_null())
                    .col(ColumnDef::new(Block::ParentHash).text().not_null())
                    .col(ColumnDef::new(Block::GasUsed).big_integer().not_null())
                    .col(ColumnDef::new(Block::GasLimit).big_integer().not_null())
                    .col(ColumnDef::new(Block::BaseFeeGwei).double().not_null())
                    .col(
                        ColumnDef::new(Block::MinPriorityFeeGwei)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Block::MaxPriorityFeeGwei)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Block::MedianPriorityFeeGwei)
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Block::AvgPriorityFeeGwei).double())
                    .col(ColumnDef::new(Block::TotalPriorityFeesGwei).double())
                    .col(ColumnDef::new(Block::TxCount).integer().not_null())
                    .col(ColumnDef::new(Block::BlockTimeSec).double())
                    .col(ColumnDef::new(Block::MgasPerSec).double())
                    .col(ColumnDef::new(Block::Tps).double())
                    .col(
                        ColumnDef::new(Block::Finalized)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Block::FinalizedAt).timestamp())
                    .col(ColumnDef::new(Block::MilestoneId).text())
                    .col(ColumnDef::new(Block::TimeToFinalitySec).double())
                    .to_owned(),
            )
            .await?;

        // Time-first ordering for storage-partition pruning on range scans.
        manager
            .create_index(
                Index::create()
                    .table(Block::Table)
                    .name("block_timestamp_number_idx")
                    .col(Block::Timestamp)
                    .col(Block::BlockNumber)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Block::Table)
                    .name("block_finalized_idx")
                    .col(Block::Finalized)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Block::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Block {
    Table,
    /// Block height; the natural identity
    BlockNumber,
    /// Time the block was produced at
    Timestamp,
    /// Block hash
    Hash,
    /// Hash of the parent block
    ParentHash,
    /// Gas used by all transactions
    GasUsed,
    /// Block gas limit
    GasLimit,
    /// Base fee in gwei
    BaseFeeGwei,
    /// Smallest priority fee in the block
    MinPriorityFeeGwei,
    /// Largest priority fee in the block
    MaxPriorityFeeGwei,
    /// Median priority fee in the block
    MedianPriorityFeeGwei,
    /// Mean effective priority fee; null until receipt enrichment
    AvgPriorityFeeGwei,
    /// Sum of effective priority fees; null until receipt enrichment
    TotalPriorityFeesGwei,
    /// Number of transactions
    TxCount,
    /// Seconds since the previous block; null without a known predecessor
    BlockTimeSec,
    /// Megagas per second; null without a known predecessor
    MgasPerSec,
    /// Transactions per second; null without a known predecessor
    Tps,
    /// Whether a milestone covers this block
    Finalized,
    /// Timestamp of the covering milestone
    FinalizedAt,
    /// Identifier of the covering milestone
    MilestoneId,
    /// finalized_at minus timestamp, seconds
    TimeToFinalitySec,
}
