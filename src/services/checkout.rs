use crate::{
    config::SiteSettings,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        payment_method::PaymentMethodKind,
        paypal_checkout::{self, CheckoutStatus, Entity as CheckoutEntity},
    },
    errors::{ProviderFailure, ServiceError},
    events::{Event, EventSender},
    services::{
        orders::{self, CreateOrderRequest, OrderService, SYSTEM_ACTOR},
        paypal::{PaymentProvider, ProviderOrderRequest, STATUS_COMPLETED},
    },
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// `orderData` of a PayPal order request: either a reference to an order that already
/// exists or a complete checkout submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PayPalOrderData {
    #[serde(rename_all = "camelCase")]
    Existing { order_number: String },
    New(Box<CreateOrderRequest>),
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayPalOrderRequest {
    /// Order total in the display currency
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Display currency; defaults to the store currency
    pub currency: Option<String>,
    #[schema(value_type = Object)]
    pub order_data: PayPalOrderData,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayPalOrderCreated {
    pub id: String,
    pub approve_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub success: bool,
    pub status: String,
    pub local_order_number: String,
    pub capture_id: Option<String>,
}

/// Converts a display-currency total into the amount charged by PayPal.
pub fn to_provider_amount(total: Decimal, rate: Decimal) -> Decimal {
    (total * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// PayPal checkout: local order bookkeeping around the provider's create and capture calls.
#[derive(Clone)]
pub struct CheckoutService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    orders: OrderService,
    provider: Option<Arc<dyn PaymentProvider>>,
    site: SiteSettings,
}

impl CheckoutService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        orders: OrderService,
        provider: Option<Arc<dyn PaymentProvider>>,
        site: SiteSettings,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            orders,
            provider,
            site,
        }
    }

    fn provider(&self) -> Result<&Arc<dyn PaymentProvider>, ServiceError> {
        self.provider.as_ref().ok_or_else(|| {
            ServiceError::PaymentProviderError(ProviderFailure::new("PayPal is not configured"))
        })
    }

    /// Creates (or reuses) the local order, opens a PayPal order for its total and records
    /// the checkout.
    #[instrument(skip(self, request), fields(amount = %request.amount))]
    pub async fn create_paypal_order(
        &self,
        request: PayPalOrderRequest,
    ) -> Result<PayPalOrderCreated, ServiceError> {
        let provider = self.provider()?.clone();

        if let Some(currency) = request.currency.as_deref() {
            if !currency.eq_ignore_ascii_case(&self.site.display_currency) {
                return Err(ServiceError::ValidationError(format!(
                    "Amounts must be expressed in {}",
                    self.site.display_currency
                )));
            }
        }
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "amount must be positive".into(),
            ));
        }

        let (order, created_locally) = match request.order_data {
            PayPalOrderData::Existing { order_number } => {
                let order = OrderEntity::find()
                    .filter(order::Column::OrderNumber.eq(order_number.as_str()))
                    .one(&*self.db_pool)
                    .await?
                    .ok_or_else(|| ServiceError::order_not_found(&order_number))?;
                ensure_payable(&order)?;
                if order.total != request.amount {
                    return Err(ServiceError::ValidationError(format!(
                        "Amount {} does not match order total {}",
                        request.amount, order.total
                    )));
                }
                if let Some(open) = open_checkout(&*self.db_pool, order.id).await? {
                    info!(
                        order_number = %order.order_number,
                        provider_order_id = %open.provider_order_id,
                        "reusing open PayPal checkout"
                    );
                    return Ok(PayPalOrderCreated {
                        id: open.provider_order_id,
                        approve_url: open.approve_url,
                    });
                }
                (order, false)
            }
            PayPalOrderData::New(submission) => {
                let mut submission = *submission;
                if submission.payment_method != PaymentMethodKind::Paypal {
                    return Err(ServiceError::ValidationError(
                        "orderData.paymentMethod must be paypal".into(),
                    ));
                }
                match submission.total {
                    Some(total) if total != request.amount => {
                        return Err(ServiceError::ValidationError(format!(
                            "Amount {} does not match order total {}",
                            request.amount, total
                        )))
                    }
                    _ => submission.total = Some(request.amount),
                }
                let view = self.orders.create_order(submission).await?;
                let order = OrderEntity::find_by_id(view.id)
                    .one(&*self.db_pool)
                    .await?
                    .ok_or_else(|| ServiceError::order_not_found(view.id))?;
                (order, true)
            }
        };

        let amount = to_provider_amount(order.total, self.site.paypal_exchange_rate);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Converted amount is too small to charge".into(),
            ));
        }

        let provider_order = match provider
            .create_order(ProviderOrderRequest {
                reference: order.order_number.clone(),
                amount,
                currency: self.site.paypal_currency.clone(),
                description: format!("{} {}", self.site.store_name, order.order_number),
            })
            .await
        {
            Ok(created) => created,
            Err(failure) => {
                if created_locally {
                    self.release_order(order.id).await;
                }
                return Err(ServiceError::PaymentProviderError(failure));
            }
        };

        let now = Utc::now();
        let txn = self.db_pool.begin().await?;
        if let Some(open) = open_checkout(&txn, order.id).await? {
            warn!(
                order_number = %order.order_number,
                kept = %open.provider_order_id,
                abandoned = %provider_order.id,
                "checkout opened concurrently for the same order"
            );
            return Ok(PayPalOrderCreated {
                id: open.provider_order_id,
                approve_url: open.approve_url,
            });
        }
        paypal_checkout::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider_order_id: Set(provider_order.id.clone()),
            order_id: Set(order.id),
            amount: Set(amount),
            currency: Set(self.site.paypal_currency.clone()),
            status: Set(CheckoutStatus::Created),
            approve_url: Set(provider_order.approve_url.clone()),
            capture_id: Set(None),
            provider_status: Set(Some(provider_order.status.clone())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut active: order::ActiveModel = order.into();
        active.provider_order_id = Set(Some(provider_order.id.clone()));
        let order = active.update(&txn).await?;
        txn.commit().await?;

        info!(
            order_number = %order.order_number,
            provider_order_id = %provider_order.id,
            amount = %amount,
            "PayPal order created"
        );

        Ok(PayPalOrderCreated {
            id: provider_order.id,
            approve_url: provider_order.approve_url,
        })
    }

    /// Cancels an order created for a PayPal checkout that never reached PayPal.
    async fn release_order(&self, order_id: Uuid) {
        if let Err(e) = self
            .orders
            .cancel(order_id, SYSTEM_ACTOR, Some("PayPal order creation failed"))
            .await
        {
            error!(order_id = %order_id, error = %e, "failed to release order after PayPal error");
        }
    }

    /// Captures an approved PayPal order. Safe to call repeatedly for the same token.
    #[instrument(skip(self))]
    pub async fn capture(&self, token: &str) -> Result<CaptureResult, ServiceError> {
        let checkout = self
            .find_checkout(token)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Unknown PayPal order {}", token)))?;

        if checkout.status == CheckoutStatus::Captured {
            info!(provider_order_id = %token, "capture replayed, returning stored result");
            return self.stored_result(checkout).await;
        }

        let order = OrderEntity::find_by_id(checkout.order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::order_not_found(checkout.order_id))?;
        if !awaiting_payment(&order) {
            // A concurrent capture of this token may have just committed.
            if let Some(latest) = self.find_checkout(token).await? {
                if latest.status == CheckoutStatus::Captured {
                    return self.stored_result(latest).await;
                }
            }
            warn!(
                provider_order_id = %token,
                order_number = %order.order_number,
                payment_status = %order.payment_status,
                "capture refused, order is no longer awaiting payment"
            );
            return Err(ServiceError::InvalidTransition(format!(
                "Order {} is no longer awaiting payment (payment status {})",
                order.order_number, order.payment_status
            )));
        }

        let provider = self.provider()?.clone();
        let capture = provider
            .capture_order(token)
            .await
            .map_err(ServiceError::PaymentProviderError)?;

        if capture.status != STATUS_COMPLETED {
            warn!(provider_order_id = %token, status = %capture.status, "capture not completed");
            return Err(ServiceError::PaymentProviderError(ProviderFailure {
                message: format!("PayPal capture was not completed (status {})", capture.status),
                provider_status: Some(capture.status),
                ..Default::default()
            }));
        }

        let capture_id = capture.capture_id.unwrap_or_else(|| capture.provider_order_id.clone());
        let now = Utc::now();
        let txn = self.db_pool.begin().await?;

        let claimed = CheckoutEntity::update_many()
            .col_expr(paypal_checkout::Column::Status, Expr::value(CheckoutStatus::Captured))
            .col_expr(paypal_checkout::Column::CaptureId, Expr::value(capture_id.clone()))
            .col_expr(
                paypal_checkout::Column::ProviderStatus,
                Expr::value(STATUS_COMPLETED),
            )
            .col_expr(paypal_checkout::Column::UpdatedAt, Expr::value(now))
            .filter(paypal_checkout::Column::Id.eq(checkout.id))
            .filter(paypal_checkout::Column::Status.eq(CheckoutStatus::Created))
            .exec(&txn)
            .await?;

        if claimed.rows_affected == 0 {
            // A concurrent capture committed first.
            drop(txn);
            let checkout = self
                .find_checkout(token)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Unknown PayPal order {}", token)))?;
            return self.stored_result(checkout).await;
        }

        let order = OrderEntity::find_by_id(checkout.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::order_not_found(checkout.order_id))?;
        if order.order_status == OrderStatus::Cancelled {
            warn!(order_id = %order.id, "payment captured for a cancelled order");
        }

        let mut events = Vec::new();
        let order = orders::mark_captured(&txn, order, &capture_id, &mut events).await?;
        txn.commit().await?;

        events.push(Event::PaymentCaptured {
            order_id: order.id,
            provider_order_id: token.to_string(),
            capture_id: capture_id.clone(),
        });
        if let Some(sender) = &self.event_sender {
            for event in events {
                sender.publish(event).await;
            }
        }

        info!(order_number = %order.order_number, capture_id = %capture_id, "PayPal payment captured");
        Ok(CaptureResult {
            success: true,
            status: STATUS_COMPLETED.to_string(),
            local_order_number: order.order_number,
            capture_id: Some(capture_id),
        })
    }

    async fn find_checkout(
        &self,
        token: &str,
    ) -> Result<Option<paypal_checkout::Model>, ServiceError> {
        Ok(CheckoutEntity::find()
            .filter(paypal_checkout::Column::ProviderOrderId.eq(token))
            .one(&*self.db_pool)
            .await?)
    }

    async fn stored_result(
        &self,
        checkout: paypal_checkout::Model,
    ) -> Result<CaptureResult, ServiceError> {
        let order = OrderEntity::find_by_id(checkout.order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::order_not_found(checkout.order_id))?;
        Ok(CaptureResult {
            success: true,
            status: STATUS_COMPLETED.to_string(),
            local_order_number: order.order_number,
            capture_id: checkout.capture_id,
        })
    }
}

/// The most recent checkout of the order that has not been captured yet.
async fn open_checkout<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<paypal_checkout::Model>, ServiceError> {
    Ok(CheckoutEntity::find()
        .filter(paypal_checkout::Column::OrderId.eq(order_id))
        .filter(paypal_checkout::Column::Status.eq(CheckoutStatus::Created))
        .order_by_desc(paypal_checkout::Column::CreatedAt)
        .one(conn)
        .await?)
}

fn awaiting_payment(order: &order::Model) -> bool {
    order.capture_id.is_none()
        && matches!(
            order.payment_status,
            PaymentStatus::Pending | PaymentStatus::Failed
        )
}

fn ensure_payable(order: &order::Model) -> Result<(), ServiceError> {
    if order.payment_method != PaymentMethodKind::Paypal {
        return Err(ServiceError::InvalidTransition(format!(
            "Order {} is not paid with PayPal",
            order.order_number
        )));
    }
    if order.order_status != OrderStatus::Pending || !awaiting_payment(order) {
        return Err(ServiceError::InvalidTransition(format!(
            "Order {} is not awaiting payment",
            order.order_number
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::product::{self, Entity as ProductEntity, ProductCategory};
    use crate::services::orders::{CustomerInfo, OrderItemInput};
    use crate::services::paypal::{MockPaymentProvider, ProviderCapture, ProviderOrder};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    async fn setup() -> (Arc<DbPool>, Uuid) {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();

        let now = Utc::now();
        let product_id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(product_id),
            sku: Set("AMBRE-100".into()),
            name_en: Set("Amber Night".into()),
            name_fr: Set("Nuit d'Ambre".into()),
            description_en: Set(None),
            description_fr: Set(None),
            category: Set(ProductCategory::Women),
            price: Set(dec!(50.00)),
            stock: Set(10),
            in_stock: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&pool)
        .await
        .unwrap();

        (Arc::new(pool), product_id)
    }

    fn service(pool: Arc<DbPool>, provider: MockPaymentProvider) -> CheckoutService {
        let site = SiteSettings::default();
        let orders = OrderService::new(pool.clone(), None, site.clone());
        CheckoutService::new(pool, None, orders, Some(Arc::new(provider)), site)
    }

    fn paypal_request(product_id: Uuid, amount: Decimal) -> PayPalOrderRequest {
        PayPalOrderRequest {
            amount,
            currency: Some("MAD".into()),
            order_data: PayPalOrderData::New(Box::new(CreateOrderRequest {
                items: vec![OrderItemInput {
                    product: product_id,
                    quantity: 2,
                }],
                customer_info: CustomerInfo {
                    name: "Salma Idrissi".into(),
                    email: "salma@example.ma".into(),
                    phone: "+212612345678".into(),
                    address: "24 Boulevard Anfa".into(),
                    city: "Casablanca".into(),
                    postal_code: Some("20000".into()),
                    country: "MA".into(),
                },
                payment_method: PaymentMethodKind::Paypal,
                total: None,
                notes: None,
                language: Some("fr".into()),
            })),
        }
    }

    async fn stock_of(pool: &DbPool, id: Uuid) -> i32 {
        ProductEntity::find_by_id(id)
            .one(pool)
            .await
            .unwrap()
            .unwrap()
            .stock
    }

    fn created(id: &str) -> Result<ProviderOrder, ProviderFailure> {
        Ok(ProviderOrder {
            id: id.to_string(),
            status: "CREATED".into(),
            approve_url: format!("https://www.sandbox.paypal.com/checkoutnow?token={}", id),
        })
    }

    #[test]
    fn provider_amount_is_converted_and_rounded() {
        assert_eq!(to_provider_amount(dec!(100.00), dec!(0.10)), dec!(10.00));
        assert_eq!(to_provider_amount(dec!(99.95), dec!(0.10)), dec!(10.00));
        assert_eq!(to_provider_amount(dec!(123.44), dec!(0.093)), dec!(11.48));
    }

    #[tokio::test]
    async fn create_sends_converted_amount_and_reserves_stock() {
        let (pool, product_id) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_create_order()
            .withf(|req| req.amount == dec!(10.00) && req.currency == "USD")
            .times(1)
            .returning(|_| created("PP-1"));

        let svc = service(pool.clone(), provider);
        let created = svc
            .create_paypal_order(paypal_request(product_id, dec!(100.00)))
            .await
            .unwrap();

        assert_eq!(created.id, "PP-1");
        assert_eq!(stock_of(&pool, product_id).await, 8);
        let checkout = svc.find_checkout("PP-1").await.unwrap().unwrap();
        assert_eq!(checkout.status, CheckoutStatus::Created);
    }

    #[tokio::test]
    async fn amount_mismatch_is_rejected_before_touching_stock() {
        let (pool, product_id) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider.expect_create_order().times(0);

        let svc = service(pool.clone(), provider);
        let err = svc
            .create_paypal_order(paypal_request(product_id, dec!(90.00)))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(stock_of(&pool, product_id).await, 10);
    }

    #[tokio::test]
    async fn provider_failure_on_create_releases_the_order() {
        let (pool, product_id) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider.expect_create_order().times(1).returning(|_| {
            Err(ProviderFailure {
                message: "declined".into(),
                provider_code: Some("PAYEE_ACCOUNT_RESTRICTED".into()),
                ..Default::default()
            })
        });

        let svc = service(pool.clone(), provider);
        let err = svc
            .create_paypal_order(paypal_request(product_id, dec!(100.00)))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::PaymentProviderError(ref f) if f.provider_code.as_deref() == Some("PAYEE_ACCOUNT_RESTRICTED"));
        assert_eq!(stock_of(&pool, product_id).await, 10);
        let orders = OrderEntity::find().all(&*pool).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn repeated_capture_calls_provider_once() {
        let (pool, product_id) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_create_order()
            .returning(|_| created("PP-2"));
        provider
            .expect_capture_order()
            .times(1)
            .returning(|id| {
                Ok(ProviderCapture {
                    provider_order_id: id.to_string(),
                    status: STATUS_COMPLETED.into(),
                    capture_id: Some("CAP-9".into()),
                })
            });

        let svc = service(pool.clone(), provider);
        svc.create_paypal_order(paypal_request(product_id, dec!(100.00)))
            .await
            .unwrap();

        let first = svc.capture("PP-2").await.unwrap();
        let second = svc.capture("PP-2").await.unwrap();
        assert_eq!(first.local_order_number, second.local_order_number);
        assert_eq!(second.capture_id.as_deref(), Some("CAP-9"));

        let order = OrderEntity::find().one(&*pool).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(order.order_status, OrderStatus::Confirmed);
        assert_eq!(order.capture_id.as_deref(), Some("CAP-9"));
        assert_eq!(stock_of(&pool, product_id).await, 8);
    }

    #[tokio::test]
    async fn incomplete_capture_leaves_order_untouched() {
        let (pool, product_id) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_create_order()
            .returning(|_| created("PP-3"));
        provider.expect_capture_order().returning(|id| {
            Ok(ProviderCapture {
                provider_order_id: id.to_string(),
                status: "PAYER_ACTION_REQUIRED".into(),
                capture_id: None,
            })
        });

        let svc = service(pool.clone(), provider);
        svc.create_paypal_order(paypal_request(product_id, dec!(100.00)))
            .await
            .unwrap();

        let err = svc.capture("PP-3").await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT_PROVIDER_ERROR");
        assert_eq!(
            err.details().unwrap()["providerStatus"],
            "PAYER_ACTION_REQUIRED"
        );

        let order = OrderEntity::find().one(&*pool).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.order_status, OrderStatus::Pending);
        let checkout = svc.find_checkout("PP-3").await.unwrap().unwrap();
        assert_eq!(checkout.status, CheckoutStatus::Created);
    }

    fn existing(order_number: &str, amount: Decimal) -> PayPalOrderRequest {
        PayPalOrderRequest {
            amount,
            currency: None,
            order_data: PayPalOrderData::Existing {
                order_number: order_number.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn reopening_a_checkout_returns_the_open_provider_order() {
        let (pool, product_id) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_create_order()
            .times(1)
            .returning(|_| created("PP-4"));

        let svc = service(pool.clone(), provider);
        let first = svc
            .create_paypal_order(paypal_request(product_id, dec!(100.00)))
            .await
            .unwrap();
        let order = OrderEntity::find().one(&*pool).await.unwrap().unwrap();

        let again = svc
            .create_paypal_order(existing(&order.order_number, dec!(100.00)))
            .await
            .unwrap();

        assert_eq!(again.id, first.id);
        assert_eq!(again.approve_url, first.approve_url);
        assert_eq!(CheckoutEntity::find().all(&*pool).await.unwrap().len(), 1);
        assert_eq!(stock_of(&pool, product_id).await, 8);
    }

    #[tokio::test]
    async fn paid_order_cannot_be_charged_through_another_checkout() {
        let (pool, product_id) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider
            .expect_create_order()
            .times(1)
            .returning(|_| created("PP-5"));
        provider
            .expect_capture_order()
            .withf(|id: &str| id == "PP-5")
            .times(1)
            .returning(|id| {
                Ok(ProviderCapture {
                    provider_order_id: id.to_string(),
                    status: STATUS_COMPLETED.into(),
                    capture_id: Some("CAP-5".into()),
                })
            });

        let svc = service(pool.clone(), provider);
        svc.create_paypal_order(paypal_request(product_id, dec!(100.00)))
            .await
            .unwrap();
        svc.capture("PP-5").await.unwrap();
        let order = OrderEntity::find().one(&*pool).await.unwrap().unwrap();

        let err = svc
            .create_paypal_order(existing(&order.order_number, dec!(100.00)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        // A stray provider order left open against the same local order
        let now = Utc::now();
        paypal_checkout::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider_order_id: Set("PP-6".into()),
            order_id: Set(order.id),
            amount: Set(dec!(10.00)),
            currency: Set("USD".into()),
            status: Set(CheckoutStatus::Created),
            approve_url: Set("https://www.sandbox.paypal.com/checkoutnow?token=PP-6".into()),
            capture_id: Set(None),
            provider_status: Set(Some("CREATED".into())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*pool)
        .await
        .unwrap();

        let err = svc.capture("PP-6").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        let order = OrderEntity::find_by_id(order.id).one(&*pool).await.unwrap().unwrap();
        assert_eq!(order.capture_id.as_deref(), Some("CAP-5"));
        assert_eq!(order.provider_order_id.as_deref(), Some("PP-5"));
        let stray = svc.find_checkout("PP-6").await.unwrap().unwrap();
        assert_eq!(stray.status, CheckoutStatus::Created);
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let (pool, _) = setup().await;
        let mut provider = MockPaymentProvider::new();
        provider.expect_capture_order().times(0);
        let err = service(pool, provider).capture("NOPE").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
