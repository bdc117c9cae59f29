use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// (method, display name, pre-authorized, fee percent, sort order)
const SEED: [(&str, &str, bool, f64, i32); 5] = [
    ("paypal", "PayPal", false, 0.0, 1),
    ("card", "Carte bancaire", false, 0.0, 2),
    ("bank_transfer", "Virement bancaire", true, 0.0, 3),
    ("cash_on_delivery", "Paiement à la livraison", true, 0.0, 4),
    ("mobile_wallet", "Portefeuille mobile", false, 0.0, 5),
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PaymentMethods::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentMethods::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::Method)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::DisplayName)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::PreAuthorized)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::FeePercent)
                            .decimal_len(7, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::FeeFixed)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::MinAmount)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::MaxAmount)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PaymentMethods::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        let mut insert = Query::insert();
        insert.into_table(PaymentMethods::Table).columns([
            PaymentMethods::Method,
            PaymentMethods::DisplayName,
            PaymentMethods::Active,
            PaymentMethods::PreAuthorized,
            PaymentMethods::FeePercent,
            PaymentMethods::SortOrder,
        ]);
        for (method, display_name, pre_authorized, fee_percent, sort_order) in SEED {
            insert.values_panic([
                method.into(),
                display_name.into(),
                true.into(),
                pre_authorized.into(),
                fee_percent.into(),
                sort_order.into(),
            ]);
        }
        manager.exec_stmt(insert).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PaymentMethods::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum PaymentMethods {
    Table,
    Id,
    Method,
    DisplayName,
    Active,
    PreAuthorized,
    FeePercent,
    FeeFixed,
    MinAmount,
    MaxAmount,
    SortOrder,
    CreatedAt,
    UpdatedAt,
}
