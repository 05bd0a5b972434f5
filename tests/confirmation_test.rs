//! Payment confirmation: redirect endpoint idempotency, concurrency and expiry.

mod common;

use axum::http::Method;
use common::{order_payload, response_json, TestApp};
use futures::future::join_all;
use serde_json::{json, Value};

async fn online_order(app: &TestApp, token: &str) -> Value {
    app.place_order(
        token,
        order_payload("online", json!([{ "itemId": "thali", "quantity": 2 }])),
    )
    .await["order"]
        .clone()
}

#[tokio::test]
async fn confirmation_settles_payment_and_starts_fulfillment() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let order = online_order(&app, &token).await;
    let session_id = order["gatewaySessionId"].as_str().expect("session id");

    app.gateway.mark_paid(session_id);
    let response = app.confirm(session_id).await;

    assert_eq!(response.status(), 200);
    let confirmed = response_json(response).await["data"].clone();
    assert_eq!(confirmed["id"], order["id"]);
    assert_eq!(confirmed["paymentStatus"], "completed");
    assert_eq!(confirmed["status"], "processing");
    assert_eq!(confirmed["gatewayPaymentIntentId"], format!("pi_{session_id}"));
    assert_eq!(confirmed["gatewayTransactionId"], format!("ch_{session_id}"));
}

#[tokio::test]
async fn repeated_confirmation_is_idempotent() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let order = online_order(&app, &token).await;
    let session_id = order["gatewaySessionId"].as_str().expect("session id");
    app.gateway.mark_paid(session_id);

    let first = response_json(app.confirm(session_id).await).await;
    let second_response = app.confirm(session_id).await;
    assert_eq!(second_response.status(), 200);
    let second = response_json(second_response).await;

    assert_eq!(first["data"]["paymentStatus"], "completed");
    assert_eq!(second["data"]["paymentStatus"], "completed");
    assert_eq!(first["data"]["version"], second["data"]["version"]);
    // A settled order is answered from the store
    assert_eq!(app.gateway.retrieve_calls(), 1);
}

#[tokio::test]
async fn concurrent_confirmations_apply_exactly_once() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let order = online_order(&app, &token).await;
    let session_id = order["gatewaySessionId"]
        .as_str()
        .expect("session id")
        .to_string();
    app.gateway.mark_paid(&session_id);

    let orders = app.state.services.orders.clone();
    let attempts = (0..8).map(|_| {
        let orders = orders.clone();
        let session_id = session_id.clone();
        async move { orders.confirm_session(&session_id).await }
    });
    let outcomes = join_all(attempts).await;

    let transitioned = outcomes
        .iter()
        .filter(|o| o.as_ref().map(|c| c.transitioned).unwrap_or(false))
        .count();
    assert_eq!(transitioned, 1);
    assert!(outcomes.iter().all(|o| o
        .as_ref()
        .map(|c| c.order.payment_status.is_paid())
        .unwrap_or(false)));
}

#[tokio::test]
async fn unpaid_session_is_not_completed() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let order = online_order(&app, &token).await;
    let session_id = order["gatewaySessionId"].as_str().expect("session id");

    let response = app.confirm(session_id).await;

    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["kind"], "PaymentNotCompleted");

    let owner_view = response_json(
        app.request(
            Method::GET,
            &format!("/api/v1/orders/{}", order["id"].as_str().unwrap()),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(owner_view["data"]["paymentStatus"], "pending");
}

#[tokio::test]
async fn expired_session_fails_payment_and_cancels_the_order() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let order = online_order(&app, &token).await;
    let session_id = order["gatewaySessionId"].as_str().expect("session id");
    app.gateway.mark_expired(session_id);

    let response = app.confirm(session_id).await;
    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["kind"], "PaymentNotCompleted");

    let owner_view = response_json(
        app.request(
            Method::GET,
            &format!("/api/v1/orders/{}", order["id"].as_str().unwrap()),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(owner_view["data"]["paymentStatus"], "failed");
    assert_eq!(owner_view["data"]["status"], "cancelled");

    // A paid report arriving after failure does not resurrect the order
    app.gateway.mark_paid(session_id);
    let late = app.confirm(session_id).await;
    assert_eq!(late.status(), 400);
}

#[tokio::test]
async fn forged_session_id_is_not_found_and_never_reaches_the_gateway() {
    let app = TestApp::new().await;

    let response = app.confirm("cs_forged_123").await;

    assert_eq!(response.status(), 404);
    assert_eq!(response_json(response).await["kind"], "OrderNotFound");
    assert_eq!(app.gateway.retrieve_calls(), 0);
}

#[tokio::test]
async fn missing_session_id_is_a_validation_error() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/orders/confirm", None, None)
        .await;

    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["kind"], "ValidationError");
}

#[tokio::test]
async fn gateway_outage_during_confirmation_leaves_order_pending() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let order = online_order(&app, &token).await;
    let session_id = order["gatewaySessionId"].as_str().expect("session id");
    app.gateway.mark_paid(session_id);
    app.gateway.fail_all(true);

    let response = app.confirm(session_id).await;
    assert_eq!(response.status(), 502);

    app.gateway.fail_all(false);
    let retry = app.confirm(session_id).await;
    assert_eq!(retry.status(), 200);
}
