use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Payment methods a customer can pick at checkout.
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethodKind {
    #[sea_orm(string_value = "paypal")]
    Paypal,
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "mobile_wallet")]
    MobileWallet,
}

/// The `payment_methods` table: which methods are offered, their fees and amount bounds.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_methods")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub method: PaymentMethodKind,
    pub display_name: String,
    pub active: bool,
    /// Orders paid this way start with payment status `completed`.
    pub pre_authorized: bool,
    pub fee_percent: Decimal,
    pub fee_fixed: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Percentage plus fixed fee for `amount`, rounded half-up to cents.
    pub fn fee_for(&self, amount: Decimal) -> Decimal {
        let fee = amount * self.fee_percent / Decimal::ONE_HUNDRED + self.fee_fixed;
        fee.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn accepts_amount(&self, amount: Decimal) -> bool {
        self.min_amount.map_or(true, |min| amount >= min)
            && self.max_amount.map_or(true, |max| amount <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn method(fee_percent: Decimal, fee_fixed: Decimal) -> Model {
        Model {
            id: 1,
            method: PaymentMethodKind::Paypal,
            display_name: "PayPal".into(),
            active: true,
            pre_authorized: false,
            fee_percent,
            fee_fixed,
            min_amount: Some(dec!(10)),
            max_amount: Some(dec!(5000)),
            sort_order: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fee_combines_percentage_and_fixed_part() {
        let m = method(dec!(3.4), dec!(0.35));
        assert_eq!(m.fee_for(dec!(100.00)), dec!(3.75));
        assert_eq!(m.fee_for(dec!(0)), dec!(0.35));
    }

    #[test]
    fn fee_rounds_half_up_to_cents() {
        let m = method(dec!(2.5), dec!(0));
        // 2.5% of 0.50 = 0.0125
        assert_eq!(m.fee_for(dec!(0.50)), dec!(0.01));
        // 2.5% of 1.00 = 0.025
        assert_eq!(m.fee_for(dec!(1.00)), dec!(0.03));
    }

    #[test]
    fn amount_bounds_are_inclusive() {
        let m = method(dec!(0), dec!(0));
        assert!(m.accepts_amount(dec!(10)));
        assert!(m.accepts_amount(dec!(5000)));
        assert!(!m.accepts_amount(dec!(9.99)));
        assert!(!m.accepts_amount(dec!(5000.01)));
    }

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(
            PaymentMethodKind::from_str("cash_on_delivery").unwrap(),
            PaymentMethodKind::CashOnDelivery
        );
        assert_eq!(PaymentMethodKind::BankTransfer.as_ref(), "bank_transfer");
        assert!(PaymentMethodKind::from_str("bitcoin").is_err());
    }
}
