pub use sea_orm_migration::prelude::*;

mod m20240610_000001_create_table_block;
mod m20240610_000002_create_table_milestone;
mod m20240610_000003_create_table_gap;
mod m20240610_000004_create_table_data_coverage;
mod m20240610_000005_create_table_reorg;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240610_000001_create_table_block::Migration),
            Box::new(m20240610_000002_create_table_milestone::Migration),
            Box::new(m20240610_000003_create_table_gap::Migration),
            Box::new(m20240610_000004_create_table_data_coverage::Migration),
            Box::new(m20240610_000005_create_table_reorg::Migration),
        ]
    }
}
