use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "block")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub block_number: i64,
    pub timestamp: TimeDateTime,
    #[sea_orm(column_type = "Text")]
    pub hash: String,
    #[sea_orm(column_type = "Text")]
    pub parent_hash: String,
    pub gas_used: i64,
    pub gas_limit: i64,
    #[sea_orm(column_type = "Double")]
    pub base_fee_gwei: f64,
    #[sea_orm(column_type = "Double")]
    pub min_priority_fee_gwei: f64,
    #[sea_orm(column_type = "Double")]
    pub max_priority_fee_gwei: f64,
    #[sea_orm(column_type = "Double")]
    pub median_priority_fee_gwei: f64,
    #[sea_orm(column_type = "Double", nullable)]
    pub avg_priority_fee_gwei: Option<f64>,
    #[sea_orm(column_type = "Double", nullable)]
    pub total_priority_fees_gwei: Option<f64>,
    pub tx_count: i32,
    #[sea_orm(column_type = "Double", nullable)]
    pub block_time_sec: Option<f64>,
    #[sea_orm(column_type = "Double", nullable)]
    pub mgas_per_sec: Option<f64>,
    #[sea_orm(column_type = "Double", nullable)]
    pub tps: Option<f64>,
    pub finalized: bool,
    pub finalized_at: Option<TimeDateTime>,
    #[sea_orm(column_type = "Text", nullable)]
    pub milestone_id: Option<String>,
    #[sea_orm(column_type = "Double", nullable)]
    pub time_to_finality_sec: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
