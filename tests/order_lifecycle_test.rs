mod common;

use axum::http::{Method, StatusCode};
use assert_matches::assert_matches;
use common::{order_payload, TestApp};
use parfum_api::auth::consts as perm;
use parfum_api::entities::{order, product};
use parfum_api::errors::ServiceError;
use parfum_api::services::orders::{CreateOrderRequest, OrderNumberSource, OrderService};
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn amount(value: &Value) -> f64 {
    value.as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn placing_an_order_prices_from_catalog_and_reserves_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("ROSE-50", dec!(850.00), 5).await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product, 2, "cash_on_delivery")),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["success"], true);
    let order = &body["data"];
    assert_eq!(order["orderStatus"], "pending");
    assert_eq!(amount(&order["total"]), 1700.0);
    assert_eq!(order["currency"], "MAD");
    assert_eq!(order["items"][0]["quantity"], 2);
    assert!(order["orderNumber"].as_str().unwrap().len() >= 8);
    assert_eq!(order["history"].as_array().unwrap().len(), 2);
    assert!(body["meta"]["timestamp"].is_string());

    assert_eq!(app.stock_of(product).await, 3);
}

#[tokio::test]
async fn insufficient_stock_rejects_the_whole_order() {
    let app = TestApp::new().await;
    let plenty = app.seed_product("OUD-100", dec!(1200.00), 10).await;
    let scarce = app.seed_product("AMBER-75", dec!(950.00), 1).await;

    let payload = json!({
        "items": [
            {"product": plenty, "quantity": 3},
            {"product": scarce, "quantity": 2}
        ],
        "customerInfo": {
            "name": "Karim Alaoui",
            "email": "karim@example.ma",
            "phone": "0612345678",
            "address": "5 Avenue Hassan II",
            "city": "Rabat"
        },
        "paymentMethod": "bank_transfer"
    });
    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(payload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_STOCK");
    assert_eq!(app.stock_of(plenty).await, 10);
    assert_eq!(app.stock_of(scarce).await, 1);
}

#[tokio::test]
async fn mismatched_client_total_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("NEROLI-50", dec!(690.00), 4).await;

    let mut payload = order_payload(product, 1, "cash_on_delivery");
    payload["total"] = json!("600.00");
    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(payload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(app.stock_of(product).await, 4);
}

#[tokio::test]
async fn invalid_customer_fields_are_listed() {
    let app = TestApp::new().await;
    let product = app.seed_product("ROSE-30", dec!(500.00), 4).await;

    let mut payload = order_payload(product, 1, "cash_on_delivery");
    payload["customerInfo"]["email"] = json!("not-an-email");
    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(payload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(
        body["error"]["details"]["fields"][0]["field"],
        "customer_info.email"
    );
}

#[tokio::test]
async fn back_office_routes_require_a_token_with_permission() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/api/v1/orders", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let reader = app.token_with_permissions(&[perm::ORDERS_READ]);
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&reader))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/confirm", uuid::Uuid::new_v4()),
            None,
            Some(&reader),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn orders_can_be_read_by_id_or_number() {
    let app = TestApp::new().await;
    let product = app.seed_product("ROSE-50", dec!(850.00), 5).await;
    let (_, created) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product, 1, "cash_on_delivery")),
        )
        .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let number = created["data"]["orderNumber"].as_str().unwrap().to_string();

    let (status, by_id) = app
        .call_admin(Method::GET, &format!("/api/v1/orders/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["data"]["orderNumber"], number.as_str());

    let (status, by_number) = app
        .call_admin(Method::GET, &format!("/api/v1/orders/{}", number), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_number["data"]["id"], id.as_str());

    let (status, missing) = app
        .call_admin(Method::GET, "/api/v1/orders/PF-DOES-NOT-EXIST", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["error"]["code"], "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn confirm_then_cancel_restocks_and_blocks_a_second_cancel() {
    let app = TestApp::new().await;
    let product = app.seed_product("OUD-100", dec!(1200.00), 6).await;
    let (_, created) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product, 2, "cash_on_delivery")),
        )
        .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.stock_of(product).await, 4);

    let (status, confirmed) = app
        .call_admin(Method::PUT, &format!("/api/v1/orders/{}/confirm", id), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["data"]["orderStatus"], "confirmed");

    let (status, cancelled) = app
        .call_admin(
            Method::PUT,
            &format!("/api/v1/orders/{}/cancel", id),
            Some(json!({"reason": "customer called"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert_eq!(cancelled["data"]["orderStatus"], "cancelled");
    assert_eq!(app.stock_of(product).await, 6);

    let history = cancelled["data"]["history"].as_array().unwrap();
    let last = history.last().unwrap();
    assert_eq!(last["actor"], "amal@parfum.test");

    let (status, again) = app
        .call_admin(Method::PUT, &format!("/api/v1/orders/{}/cancel", id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(again["error"]["code"], "INVALID_TRANSITION");
    assert_eq!(app.stock_of(product).await, 6);
}

#[tokio::test]
async fn refund_requires_a_completed_payment() {
    let app = TestApp::new().await;
    let product = app.seed_product("AMBER-75", dec!(950.00), 6).await;

    // PayPal orders start with a pending payment
    let (_, pending) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product, 1, "paypal")),
        )
        .await;
    let pending_id = pending["data"]["id"].as_str().unwrap().to_string();
    let (status, body) = app
        .call_admin(
            Method::PUT,
            &format!("/api/v1/orders/{}/refund", pending_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    // Bank transfers are recorded as paid on creation
    let (_, paid) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product, 1, "bank_transfer")),
        )
        .await;
    assert_eq!(paid["data"]["paymentStatus"], "completed");
    let paid_id = paid["data"]["id"].as_str().unwrap().to_string();
    let (status, refunded) = app
        .call_admin(
            Method::PUT,
            &format!("/api/v1/orders/{}/refund", paid_id),
            Some(json!({"reason": "damaged bottle"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{refunded}");
    assert_eq!(refunded["data"]["paymentStatus"], "refunded");
    assert_eq!(refunded["data"]["orderStatus"], "pending");
}

#[tokio::test]
async fn status_updates_follow_the_forward_graph_unless_overridden() {
    let app = TestApp::new().await;
    let product = app.seed_product("ROSE-50", dec!(850.00), 5).await;
    let (_, created) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product, 1, "cash_on_delivery")),
        )
        .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/orders/{}/status", id);

    let (status, shipped) = app
        .call_admin(Method::PUT, &uri, Some(json!({"orderStatus": "shipped"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{shipped}");
    assert_eq!(shipped["data"]["orderStatus"], "shipped");

    let (status, backwards) = app
        .call_admin(Method::PUT, &uri, Some(json!({"orderStatus": "confirmed"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(backwards["error"]["code"], "INVALID_TRANSITION");

    let (status, unreasoned) = app
        .call_admin(
            Method::PUT,
            &uri,
            Some(json!({"orderStatus": "confirmed", "override": true})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(unreasoned["error"]["code"], "VALIDATION_ERROR");

    let (status, forced) = app
        .call_admin(
            Method::PUT,
            &uri,
            Some(json!({"orderStatus": "confirmed", "override": true, "reason": "courier returned parcel"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{forced}");
    assert_eq!(forced["data"]["orderStatus"], "confirmed");

    let (status, unknown) = app
        .call_admin(Method::PUT, &uri, Some(json!({"orderStatus": "teleported"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn order_list_is_paginated_and_filterable() {
    let app = TestApp::new().await;
    let product = app.seed_product("NEROLI-50", dec!(690.00), 20).await;
    for method in ["cash_on_delivery", "cash_on_delivery", "paypal"] {
        let (status, _) = app
            .call(
                Method::POST,
                "/api/v1/orders",
                Some(order_payload(product, 1, method)),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = app
        .call_admin(Method::GET, "/api/v1/orders?page=1&limit=2", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"]["total"], 3);
    assert_eq!(page["data"]["totalPages"], 2);
    assert_eq!(page["data"]["items"].as_array().unwrap().len(), 2);

    let (_, pending_payment) = app
        .call_admin(Method::GET, "/api/v1/orders?paymentStatus=pending", None)
        .await;
    assert_eq!(pending_payment["data"]["total"], 1);

    let (status, bad) = app
        .call_admin(Method::GET, "/api/v1/orders?limit=500", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(bad["error"]["code"], "VALIDATION_ERROR");
}

/// Always proposes the same order number.
struct FixedNumbers(&'static str);

impl OrderNumberSource for FixedNumbers {
    fn candidate(&self, _now: chrono::DateTime<chrono::Utc>) -> String {
        self.0.to_string()
    }
}

#[tokio::test]
async fn colliding_order_numbers_give_up_without_reserving_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("AMBER-75", dec!(950.00), 3).await;
    let orders = OrderService::new(app.state.db.clone(), None, app.state.config.site.clone())
        .with_order_numbers(Arc::new(FixedNumbers("PF-260301-AAAAAA")));
    let request = || -> CreateOrderRequest {
        serde_json::from_value(order_payload(product, 1, "bank_transfer")).unwrap()
    };

    let first = orders.create_order(request()).await.unwrap();
    assert_eq!(first.order_number, "PF-260301-AAAAAA");

    let err = orders.create_order(request()).await.unwrap_err();
    assert_matches!(err, ServiceError::OrderNumberExhausted(5));
    assert_eq!(err.code(), "ORDER_NUMBER_EXHAUSTED");
    assert_eq!(app.stock_of(product).await, 2);
}

/// Hands out the queued numbers in turn, repeating the last one.
struct QueuedNumbers(Mutex<Vec<&'static str>>);

impl OrderNumberSource for QueuedNumbers {
    fn candidate(&self, _now: chrono::DateTime<chrono::Utc>) -> String {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.remove(0).to_string()
        } else {
            queue[0].to_string()
        }
    }
}

#[tokio::test]
async fn taken_order_number_is_retried_with_a_fresh_one() {
    let app = TestApp::new().await;
    let product = app.seed_product("ROSE-50", dec!(850.00), 3).await;
    let request = || -> CreateOrderRequest {
        serde_json::from_value(order_payload(product, 1, "cash_on_delivery")).unwrap()
    };
    let site = app.state.config.site.clone();

    OrderService::new(app.state.db.clone(), None, site.clone())
        .with_order_numbers(Arc::new(FixedNumbers("PF-260301-AAAAAA")))
        .create_order(request())
        .await
        .unwrap();

    let second = OrderService::new(app.state.db.clone(), None, site)
        .with_order_numbers(Arc::new(QueuedNumbers(Mutex::new(vec![
            "PF-260301-AAAAAA",
            "PF-260301-BBBBBB",
        ]))))
        .create_order(request())
        .await
        .unwrap();

    assert_eq!(second.order_number, "PF-260301-BBBBBB");
    assert_eq!(second.items.len(), 1);
    assert_eq!(app.stock_of(product).await, 1);
}

#[tokio::test]
async fn padded_customer_email_is_accepted_and_stored_normalized() {
    let app = TestApp::new().await;
    let product = app.seed_product("NEROLI-50", dec!(690.00), 4).await;

    let mut payload = order_payload(product, 1, "cash_on_delivery");
    payload["customerInfo"]["email"] = json!(" Yasmine@Example.MA ");
    payload["customerInfo"]["name"] = json!("  Yasmine Benali ");
    let (status, body) = app.call(Method::POST, "/api/v1/orders", Some(payload)).await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["customer"]["email"], "yasmine@example.ma");
    assert_eq!(body["data"]["customer"]["name"], "Yasmine Benali");
}

#[tokio::test]
async fn line_items_and_history_keep_their_order() {
    let app = TestApp::new().await;
    let rose = app.seed_product("ROSE-50", dec!(850.00), 5).await;
    let oud = app.seed_product("OUD-100", dec!(1200.00), 5).await;
    let amber = app.seed_product("AMBER-75", dec!(950.00), 5).await;

    let payload = json!({
        "items": [
            {"product": oud, "quantity": 1},
            {"product": amber, "quantity": 2},
            {"product": rose, "quantity": 3}
        ],
        "customerInfo": {
            "name": "Sofia Lahlou",
            "email": "sofia@example.ma",
            "phone": "0611223344",
            "address": "9 Rue de la Liberté",
            "city": "Tanger"
        },
        "paymentMethod": "cash_on_delivery"
    });
    let (status, created) = app.call(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (_, confirmed) = app
        .call_admin(Method::PUT, &format!("/api/v1/orders/{}/confirm", id), None)
        .await;

    let products: Vec<String> = confirmed["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["productId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        products,
        vec![oud.to_string(), amber.to_string(), rose.to_string()]
    );

    let trail: Vec<(&str, &str)> = confirmed["data"]["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| (h["field"].as_str().unwrap(), h["toStatus"].as_str().unwrap()))
        .collect();
    assert_eq!(
        trail,
        vec![
            ("order_status", "pending"),
            ("payment_status", "pending"),
            ("order_status", "confirmed"),
        ]
    );
}

#[tokio::test]
async fn cancelling_only_relists_products_that_sold_out() {
    let app = TestApp::new().await;
    let last_bottle = app.seed_product("OUD-100", dec!(1200.00), 1).await;
    let withdrawn = app.seed_product("ROSE-50", dec!(850.00), 5).await;

    let payload = json!({
        "items": [
            {"product": last_bottle, "quantity": 1},
            {"product": withdrawn, "quantity": 1}
        ],
        "customerInfo": {
            "name": "Imane Fassi",
            "email": "imane@example.ma",
            "phone": "0612121212",
            "address": "4 Place Mohammed V",
            "city": "Casablanca"
        },
        "paymentMethod": "cash_on_delivery"
    });
    let (status, created) = app.call(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");

    let (_, sold_out) = app
        .call(Method::GET, &format!("/api/v1/products/{}", last_bottle), None)
        .await;
    assert_eq!(sold_out["data"]["inStock"], false);

    // Merchandising takes the other product off sale
    product::Entity::update_many()
        .col_expr(product::Column::InStock, Expr::value(false))
        .filter(product::Column::Id.eq(withdrawn))
        .exec(&*app.state.db)
        .await
        .unwrap();

    let id = created["data"]["id"].as_str().unwrap();
    let (status, _) = app
        .call_admin(Method::PUT, &format!("/api/v1/orders/{}/cancel", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, relisted) = app
        .call(Method::GET, &format!("/api/v1/products/{}", last_bottle), None)
        .await;
    assert_eq!(relisted["data"]["inStock"], true);
    assert_eq!(relisted["data"]["stock"], 1);

    let (_, still_off) = app
        .call(Method::GET, &format!("/api/v1/products/{}", withdrawn), None)
        .await;
    assert_eq!(still_off["data"]["inStock"], false);
    assert_eq!(still_off["data"]["stock"], 5);
}

#[tokio::test]
async fn cancel_with_refund_in_one_update_refunds_once() {
    let app = TestApp::new().await;
    let product = app.seed_product("AMBER-75", dec!(950.00), 4).await;
    let (_, paid) = app
        .call(
            Method::POST,
            "/api/v1/orders",
            Some(order_payload(product, 2, "bank_transfer")),
        )
        .await;
    assert_eq!(paid["data"]["paymentStatus"], "completed");
    let id = paid["data"]["id"].as_str().unwrap();

    let (status, updated) = app
        .call_admin(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({"orderStatus": "cancelled", "paymentStatus": "refunded"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["data"]["orderStatus"], "cancelled");
    assert_eq!(updated["data"]["paymentStatus"], "refunded");
    let refunds = updated["data"]["history"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|h| h["toStatus"] == "refunded")
        .count();
    assert_eq!(refunds, 1);
    assert_eq!(app.stock_of(product).await, 4);
}

#[tokio::test]
async fn concurrent_orders_for_the_last_units_sell_them_once() {
    let app = TestApp::with_config(|cfg| {
        cfg.db_max_connections = 4;
    })
    .await;
    let product = app.seed_product("OUD-100", dec!(1200.00), 2).await;
    let orders = OrderService::new(app.state.db.clone(), None, app.state.config.site.clone());
    let request = || -> CreateOrderRequest {
        serde_json::from_value(order_payload(product, 2, "cash_on_delivery")).unwrap()
    };

    let (first, second) = tokio::join!(
        orders.create_order(request()),
        orders.create_order(request())
    );

    let placed = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(placed, 1, "{first:?} / {second:?}");
    assert_eq!(app.stock_of(product).await, 0);
    let stored = order::Entity::find().count(&*app.state.db).await.unwrap();
    assert_eq!(stored, 1);
}
