use sea_orm_migration::prelude::*;

use super::m20260301_000003_create_orders_tables::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PaypalCheckouts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaypalCheckouts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Capture idempotency hangs off this constraint.
                    .col(
                        ColumnDef::new(PaypalCheckouts::ProviderOrderId)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(PaypalCheckouts::OrderId).uuid().not_null())
                    .col(
                        ColumnDef::new(PaypalCheckouts::Amount)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaypalCheckouts::Currency)
                            .string_len(3)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaypalCheckouts::Status)
                            .string_len(16)
                            .not_null()
                            .default("created"),
                    )
                    .col(ColumnDef::new(PaypalCheckouts::ApproveUrl).text().not_null())
                    .col(ColumnDef::new(PaypalCheckouts::CaptureId).string_len(64).null())
                    .col(
                        ColumnDef::new(PaypalCheckouts::ProviderStatus)
                            .string_len(32)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PaypalCheckouts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaypalCheckouts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_paypal_checkouts_order_id")
                            .from(PaypalCheckouts::Table, PaypalCheckouts::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_paypal_checkouts_order_id_status")
                    .table(PaypalCheckouts::Table)
                    .col(PaypalCheckouts::OrderId)
                    .col(PaypalCheckouts::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PaypalCheckouts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PaypalCheckouts {
    Table,
    Id,
    ProviderOrderId,
    OrderId,
    Amount,
    Currency,
    Status,
    ApproveUrl,
    CaptureId,
    ProviderStatus,
    CreatedAt,
    UpdatedAt,
}
