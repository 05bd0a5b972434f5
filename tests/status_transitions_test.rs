//! Fulfillment status changes by owners and staff.

mod common;

use axum::http::Method;
use common::{order_payload, response_json, TestApp};
use serde_json::{json, Value};

async fn cod_order(app: &TestApp, token: &str) -> String {
    app.place_order(
        token,
        order_payload("cod", json!([{ "itemId": "thali", "quantity": 1 }])),
    )
    .await["order"]["id"]
        .as_str()
        .expect("order id")
        .to_string()
}

async fn admin_put(app: &TestApp, id: &str, body: Value) -> (u16, Value) {
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/admin/{id}"),
            Some(body),
            Some(&app.admin_token()),
        )
        .await;
    let status = response.status().as_u16();
    (status, response_json(response).await)
}

#[tokio::test]
async fn admin_moves_fulfillment_forward_and_records_delivery() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;

    let (status, body) = admin_put(
        &app,
        &id,
        json!({ "status": "shipped", "expectedDeliveryDate": "2030-01-02T10:00:00Z" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "shipped");
    assert_eq!(body["data"]["expectedDeliveryDate"], "2030-01-02T10:00:00Z");
    assert!(body["data"]["deliveredAt"].is_null());

    let (status, body) = admin_put(&app, &id, json!({ "status": "delivered" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "delivered");
    assert!(body["data"]["deliveredAt"].is_string());
}

#[tokio::test]
async fn admin_cannot_move_backwards_or_leave_a_terminal_state() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;

    let (status, _) = admin_put(&app, &id, json!({ "status": "shipped" })).await;
    assert_eq!(status, 200);

    let (status, body) = admin_put(&app, &id, json!({ "status": "processing" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "InvalidTransition");

    let (status, _) = admin_put(&app, &id, json!({ "status": "cancelled" })).await;
    assert_eq!(status, 400, "shipped orders cannot be cancelled");

    let (status, _) = admin_put(&app, &id, json!({ "status": "delivered" })).await;
    assert_eq!(status, 200);
    let (status, _) = admin_put(&app, &id, json!({ "status": "shipped" })).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn setting_the_same_status_is_a_no_op() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;

    let (_, before) = admin_put(&app, &id, json!({ "status": "processing" })).await;
    let (status, after) = admin_put(&app, &id, json!({ "status": "processing" })).await;

    assert_eq!(status, 200);
    assert_eq!(before["data"]["version"], after["data"]["version"]);
}

#[tokio::test]
async fn admin_update_needs_a_field() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;

    let (status, body) = admin_put(&app, &id, json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "ValidationError");

    let (status, body) = admin_put(
        &app,
        &id,
        json!({ "expectedDeliveryDate": "2030-05-01T00:00:00Z" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["expectedDeliveryDate"], "2030-05-01T00:00:00Z");
}

#[tokio::test]
async fn owner_may_cancel_before_shipment() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}"),
            Some(json!({ "status": "cancelled" })),
            Some(&token),
        )
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response_json(response).await["data"]["status"], "cancelled");

    let (status, _) = admin_put(&app, &id, json!({ "status": "shipped" })).await;
    assert_eq!(status, 400, "cancelled is terminal");
}

#[tokio::test]
async fn owner_cannot_cancel_after_shipment() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;
    admin_put(&app, &id, json!({ "status": "shipped" })).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}"),
            Some(json!({ "status": "cancelled" })),
            Some(&token),
        )
        .await;

    assert_eq!(response.status(), 400);
    assert_eq!(response_json(response).await["kind"], "InvalidTransition");
}

#[tokio::test]
async fn owner_cannot_advance_fulfillment() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}"),
            Some(json!({ "status": "delivered" })),
            Some(&token),
        )
        .await;

    assert_eq!(response.status(), 403);
    assert_eq!(response_json(response).await["kind"], "AccessDenied");
}

#[tokio::test]
async fn unknown_status_value_is_rejected() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let id = cod_order(&app, &token).await;

    let (status, body) = admin_put(&app, &id, json!({ "status": "teleported" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "ValidationError");
}

#[tokio::test]
async fn concurrent_admin_ship_and_owner_cancel_have_one_winner() {
    let app = TestApp::new().await;
    let token = app.customer_token("user-1", "asha@example.com");
    let admin = app.admin_token();

    for _ in 0..8 {
        let id = cod_order(&app, &token).await;
        let admin_uri = format!("/api/v1/orders/admin/{id}");
        let owner_uri = format!("/api/v1/orders/{id}");

        let (ship, cancel) = futures::future::join(
            app.request(
                Method::PUT,
                &admin_uri,
                Some(json!({ "status": "shipped" })),
                Some(&admin),
            ),
            app.request(
                Method::PUT,
                &owner_uri,
                Some(json!({ "status": "cancelled" })),
                Some(&token),
            ),
        )
        .await;

        let ship_status = ship.status().as_u16();
        let cancel_status = cancel.status().as_u16();
        let ship_body = response_json(ship).await;
        let cancel_body = response_json(cancel).await;

        let winner = match (ship_status, cancel_status) {
            (200, 400) => {
                assert_eq!(cancel_body["kind"], "InvalidTransition");
                "shipped"
            }
            (400, 200) => {
                assert_eq!(ship_body["kind"], "InvalidTransition");
                "cancelled"
            }
            other => panic!("expected exactly one winner, got {other:?}"),
        };

        let stored = response_json(
            app.request(Method::GET, &owner_uri, None, Some(&token))
                .await,
        )
        .await;
        assert_eq!(stored["data"]["status"], winner);
    }
}
