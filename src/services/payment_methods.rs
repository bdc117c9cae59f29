use crate::{
    db::DbPool,
    entities::payment_method::{self, Entity as PaymentMethodEntity, PaymentMethodKind},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

/// Public view of an offered payment method.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodView {
    pub method: PaymentMethodKind,
    pub display_name: String,
    pub fee_percent: Decimal,
    pub fee_fixed: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

impl From<payment_method::Model> for PaymentMethodView {
    fn from(m: payment_method::Model) -> Self {
        Self {
            method: m.method,
            display_name: m.display_name,
            fee_percent: m.fee_percent,
            fee_fixed: m.fee_fixed,
            min_amount: m.min_amount,
            max_amount: m.max_amount,
        }
    }
}

/// Reads the payment-method configuration table.
#[derive(Clone)]
pub struct PaymentMethodService {
    db_pool: Arc<DbPool>,
}

impl PaymentMethodService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<PaymentMethodView>, ServiceError> {
        let methods = PaymentMethodEntity::find()
            .filter(payment_method::Column::Active.eq(true))
            .order_by_asc(payment_method::Column::SortOrder)
            .all(&*self.db_pool)
            .await?;
        Ok(methods.into_iter().map(Into::into).collect())
    }

    /// Checks that `method` is configured, active, and accepts `total`.
    ///
    /// Takes the connection explicitly so order creation can run it inside its transaction.
    pub async fn validate_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        method: PaymentMethodKind,
        total: Decimal,
    ) -> Result<payment_method::Model, ServiceError> {
        let config = PaymentMethodEntity::find()
            .filter(payment_method::Column::Method.eq(method))
            .one(conn)
            .await?
            .filter(|m| m.active)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("Payment method {} is not available", method))
            })?;

        if !config.accepts_amount(total) {
            return Err(ServiceError::ValidationError(format!(
                "Order total {} is outside the limits of payment method {}",
                total, method
            )));
        }

        Ok(config)
    }
}
