use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Milestone::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Milestone::SequenceId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Milestone::MilestoneId).text().not_null())
                    .col(
                        ColumnDef::new(Milestone::StartBlock)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Milestone::EndBlock).big_integer().not_null())
                    .col(ColumnDef::new(Milestone::Hash).text().not_null())
                    .col(ColumnDef::new(Milestone::Proposer).text().not_null())
                    .col(ColumnDef::new(Milestone::Timestamp).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        // The reconciler joins unfinalized blocks against these ranges.
        manager
            .create_index(
                Index::create()
                    .table(Milestone::Table)
                    .name("milestone_block_range_idx")
                    .col(Milestone::StartBlock)
                    .col(Milestone::EndBlock)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Milestone::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Milestone {
    Table,
    /// Attestation sequence number; the natural identity
    SequenceId,
    /// Chain-level milestone identifier
    MilestoneId,
    /// First finalized block
    StartBlock,
    /// Last finalized block, inclusive
    EndBlock,
    /// Attestation hash
    Hash,
    /// Proposer address
    Proposer,
    /// Attestation time
    Timestamp,
}
