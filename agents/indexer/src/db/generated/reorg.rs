use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "reorg")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub block_number: i64,
    #[sea_orm(column_type = "Text")]
    pub old_hash: String,
    pub block_timestamp: TimeDateTime,
    pub reorged_at: TimeDateTime,
    #[sea_orm(column_type = "Text")]
    pub reason: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub replaced_by_hash: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
