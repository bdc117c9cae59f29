pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_products_table;
mod m20260301_000002_create_payment_methods_table;
mod m20260301_000003_create_orders_tables;
mod m20260301_000004_create_paypal_checkouts_table;
mod m20260301_000005_create_submission_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_products_table::Migration),
            Box::new(m20260301_000002_create_payment_methods_table::Migration),
            Box::new(m20260301_000003_create_orders_tables::Migration),
            Box::new(m20260301_000004_create_paypal_checkouts_table::Migration),
            Box::new(m20260301_000005_create_submission_tables::Migration),
        ]
    }
}
