/*!
 * # Metrics Module
 *
 * Prometheus counters for the order, payment and intake flows, rendered in text exposition
 * format at `/metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Encoder,
    IntCounter, IntCounterVec, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("parfum".to_string()), None).expect("registry can be created");
    pub static ref ORDERS_CREATED: IntCounterVec = register_int_counter_vec_with_registry!(
        "orders_created_total",
        "Orders created, by payment method",
        &["payment_method"],
        REGISTRY
    )
    .expect("metric can be created");
    pub static ref ORDER_FAILURES: IntCounterVec = register_int_counter_vec_with_registry!(
        "order_failures_total",
        "Rejected order submissions and transitions, by error code",
        &["code"],
        REGISTRY
    )
    .expect("metric can be created");
    pub static ref ORDER_TRANSITIONS: IntCounterVec = register_int_counter_vec_with_registry!(
        "order_transitions_total",
        "Applied status transitions",
        &["field", "to"],
        REGISTRY
    )
    .expect("metric can be created");
    pub static ref PAYPAL_CALLS: IntCounterVec = register_int_counter_vec_with_registry!(
        "paypal_calls_total",
        "Calls to the PayPal REST API, by operation and outcome",
        &["operation", "outcome"],
        REGISTRY
    )
    .expect("metric can be created");
    pub static ref SUBMISSIONS: IntCounterVec = register_int_counter_vec_with_registry!(
        "submissions_total",
        "Contact and sample submissions, by kind and disposition",
        &["kind", "disposition"],
        REGISTRY
    )
    .expect("metric can be created");
    pub static ref DOMAIN_EVENTS: IntCounterVec = register_int_counter_vec_with_registry!(
        "domain_events_total",
        "Domain events consumed by the event loop",
        &["event"],
        REGISTRY
    )
    .expect("metric can be created");
    pub static ref RATE_LIMIT_DENIED: IntCounter = register_int_counter_with_registry!(
        "rate_limit_denied_total",
        "Requests rejected by the public-route rate limiter",
        REGISTRY
    )
    .expect("metric can be created");
    pub static ref DB_PING_FAILURES: IntCounter = register_int_counter_with_registry!(
        "db_ping_failures_total",
        "Failed database health checks",
        REGISTRY
    )
    .expect("metric can be created");
}

/// Renders every registered metric in Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    // Touch the lazies so series show up before their first increment.
    lazy_static::initialize(&ORDERS_CREATED);
    lazy_static::initialize(&ORDER_FAILURES);
    lazy_static::initialize(&ORDER_TRANSITIONS);
    lazy_static::initialize(&PAYPAL_CALLS);
    lazy_static::initialize(&SUBMISSIONS);
    lazy_static::initialize(&DOMAIN_EVENTS);
    lazy_static::initialize(&RATE_LIMIT_DENIED);
    lazy_static::initialize(&DB_PING_FAILURES);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
