pub mod catalog;
pub mod common;
pub mod health;
pub mod intake;
pub mod orders;
pub mod paypal;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    catalog::CatalogService,
    checkout::CheckoutService,
    intake::IntakeService,
    orders::OrderService,
    payment_methods::PaymentMethodService,
    paypal::{PayPalClient, PaymentProvider},
};
use std::sync::Arc;
use tracing::{info, warn};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub intake: Arc<IntakeService>,
    pub catalog: Arc<CatalogService>,
    pub payment_methods: Arc<PaymentMethodService>,
}

impl AppServices {
    /// Builds every service. `provider` overrides the PayPal client derived from `config`.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        provider: Option<Arc<dyn PaymentProvider>>,
    ) -> Self {
        let provider = provider.or_else(|| paypal_from_config(config));

        let orders = OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            config.site.clone(),
        );
        let checkout = CheckoutService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            orders.clone(),
            provider,
            config.site.clone(),
        );
        let intake = IntakeService::new(
            db_pool.clone(),
            Some(event_sender),
            config.intake.clone(),
        );

        Self {
            orders: Arc::new(orders),
            checkout: Arc::new(checkout),
            intake: Arc::new(intake),
            catalog: Arc::new(CatalogService::new(db_pool.clone())),
            payment_methods: Arc::new(PaymentMethodService::new(db_pool)),
        }
    }
}

fn paypal_from_config(config: &AppConfig) -> Option<Arc<dyn PaymentProvider>> {
    if !config.paypal.enabled {
        info!("PayPal checkout disabled");
        return None;
    }
    if !config.paypal.has_credentials() {
        warn!("PayPal is enabled but client credentials are missing; checkout will fail");
        return None;
    }
    match PayPalClient::new(&config.paypal, &config.site.store_name) {
        Ok(client) => {
            info!(base_url = %config.paypal.base_url, "PayPal checkout enabled");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!(error = %e, "could not build PayPal client");
            None
        }
    }
}
