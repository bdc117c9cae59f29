use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::payment_method::PaymentMethodKind;

/// Fulfilment status of an order.
///
/// The forward path is `pending → confirmed → processing → shipped → delivered`;
/// `cancelled` is reachable from every status except `delivered` and is terminal.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Position on the forward path; `None` for `cancelled`.
    fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled => None,
        }
    }

    /// Forward moves only; skipping intermediate steps is allowed.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }

    pub fn can_cancel(self) -> bool {
        !matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Payment status of an order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    /// Direct transitions outside the refund path.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Failed, Pending) | (Failed, Completed)
        )
    }

    pub fn can_refund(self) -> bool {
        self == PaymentStatus::Completed
    }
}

/// Which status column a history row refers to.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusField {
    #[sea_orm(string_value = "order_status")]
    OrderStatus,
    #[sea_orm(string_value = "payment_status")]
    PaymentStatus,
}

/// The `orders` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-readable `PF-YYMMDD-XXXXXX`; immutable once assigned.
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub address_line: String,
    pub city: String,
    pub postal_code: Option<String>,
    pub country: String,
    pub payment_method: PaymentMethodKind,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: Decimal,
    pub currency: String,
    pub notes: Option<String>,
    #[sea_orm(unique)]
    pub provider_order_id: Option<String>,
    pub capture_id: Option<String>,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            self.updated_at = Set(Utc::now());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Confirmed, true)]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Processing, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
    #[case(OrderStatus::Confirmed, OrderStatus::Pending, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Shipped, false)]
    #[case(OrderStatus::Processing, OrderStatus::Processing, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Confirmed, false)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled, false)]
    fn order_status_forward_graph(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_advance_to(to), allowed);
    }

    #[rstest]
    #[case(OrderStatus::Pending, true)]
    #[case(OrderStatus::Confirmed, true)]
    #[case(OrderStatus::Processing, true)]
    #[case(OrderStatus::Shipped, true)]
    #[case(OrderStatus::Delivered, false)]
    #[case(OrderStatus::Cancelled, false)]
    fn cancellation_window(#[case] status: OrderStatus, #[case] allowed: bool) {
        assert_eq!(status.can_cancel(), allowed);
    }

    #[rstest]
    #[case(PaymentStatus::Pending, PaymentStatus::Completed, true)]
    #[case(PaymentStatus::Pending, PaymentStatus::Failed, true)]
    #[case(PaymentStatus::Failed, PaymentStatus::Pending, true)]
    #[case(PaymentStatus::Failed, PaymentStatus::Completed, true)]
    #[case(PaymentStatus::Completed, PaymentStatus::Pending, false)]
    #[case(PaymentStatus::Completed, PaymentStatus::Refunded, false)]
    #[case(PaymentStatus::Refunded, PaymentStatus::Completed, false)]
    fn payment_status_graph(
        #[case] from: PaymentStatus,
        #[case] to: PaymentStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_completed_payments_refund() {
        assert!(PaymentStatus::Completed.can_refund());
        assert!(!PaymentStatus::Pending.can_refund());
        assert!(!PaymentStatus::Refunded.can_refund());
    }

    #[test]
    fn statuses_parse_from_wire_names() {
        assert_eq!(
            OrderStatus::from_str("processing").unwrap(),
            OrderStatus::Processing
        );
        assert_eq!(
            PaymentStatus::from_str("refunded").unwrap(),
            PaymentStatus::Refunded
        );
        assert!(OrderStatus::from_str("Shipped").is_err());
    }
}
