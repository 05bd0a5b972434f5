use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser};
use crate::models::order::{
    Contact, Order, OrderLineItem, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
use crate::services::checkout::{CheckoutOutcome, CreateOrderRequest};
use crate::services::orders::{AdminOrderUpdate, OwnerOrderUpdate};
use crate::services::pricing::round_money;
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineResponse {
    pub item_id: String,
    pub name: String,
    #[schema(example = "100.00")]
    pub unit_price: String,
    pub quantity: u32,
}

impl From<&OrderLineItem> for OrderLineResponse {
    fn from(line: &OrderLineItem) -> Self {
        Self {
            item_id: line.item_id.clone(),
            name: line.name.clone(),
            unit_price: round_money(line.unit_price).to_string(),
            quantity: line.quantity,
        }
    }
}

/// Order as returned by every endpoint. Money is a two-place decimal string.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub owner_id: String,
    pub contact: Contact,
    pub shipping_address: ShippingAddress,
    pub lines: Vec<OrderLineResponse>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub gateway_session_id: Option<String>,
    pub gateway_payment_intent_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    #[schema(example = "200.00")]
    pub subtotal: String,
    #[schema(example = "20.00")]
    pub tax: String,
    #[schema(example = "0.00")]
    pub shipping: String,
    #[schema(example = "220.00")]
    pub total: String,
    pub currency: String,
    pub expected_delivery_date: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            lines: order.lines.iter().map(OrderLineResponse::from).collect(),
            id: order.id,
            owner_id: order.owner_id,
            contact: order.contact,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            status: order.status,
            gateway_session_id: order.gateway_session_id,
            gateway_payment_intent_id: order.gateway_payment_intent_id,
            gateway_transaction_id: order.gateway_transaction_id,
            subtotal: round_money(order.subtotal).to_string(),
            tax: round_money(order.tax).to_string(),
            shipping: round_money(order.shipping).to_string(),
            total: round_money(order.total).to_string(),
            currency: order.currency,
            expected_delivery_date: order.expected_delivery_date,
            delivered_at: order.delivered_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
            version: order.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order: OrderResponse,
    /// Hosted checkout page; present for online payment only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Client-declared amounts did not match server pricing
    pub declared_total_mismatch: bool,
}

impl From<CheckoutOutcome> for CreateOrderResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        Self {
            order: outcome.order.into(),
            redirect_url: outcome.redirect_url,
            declared_total_mismatch: outcome.declared_total_mismatch,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConfirmQuery {
    /// Gateway checkout session id
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EmailQuery {
    /// Optional correlation email; must match the order contact when given
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AdminListQuery {
    /// Only orders in this fulfillment status
    pub status: Option<String>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ServiceError::ValidationError(rejection.body_text()))
}

// Malformed ids can never name an order
fn parse_order_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ServiceError::OrderNotFound(raw.to_string()))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Place order",
    description = "Converts a cart into an order. Prices come from the menu catalog; client-supplied prices and totals are ignored.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CreateOrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "EmptyCart, BelowMinimumOrder or ValidationError", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "ItemNotFound", body = crate::errors::ErrorResponse),
        (status = 502, description = "GatewayUnavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = json_body(body)?;
    let outcome = state.services.checkout.place_order(&user, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateOrderResponse::from(outcome))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/confirm",
    summary = "Confirm payment",
    description = "Idempotent payment confirmation for a gateway session. Safe to call repeatedly.",
    params(ConfirmQuery),
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<OrderResponse>),
        (status = 400, description = "PaymentNotCompleted or ValidationError", body = crate::errors::ErrorResponse),
        (status = 404, description = "OrderNotFound", body = crate::errors::ErrorResponse),
        (status = 502, description = "GatewayUnavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let session_id = query.session_id.unwrap_or_default();
    let outcome = state.services.orders.confirm_session(&session_id).await?;
    Ok(Json(ApiResponse::success(outcome.order.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "My orders",
    description = "Orders placed by the authenticated principal, newest first",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    let orders = state.services.orders.list_for_owner(&user).await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(OrderResponse::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = String, Path, description = "Order ID"), EmailQuery),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "AccessDenied", body = crate::errors::ErrorResponse),
        (status = 404, description = "OrderNotFound", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .services
        .orders
        .get_for_owner(&user, order_id, query.email.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}",
    summary = "Cancel own order",
    description = "Owners may only move their order to `cancelled`, and only before it ships.",
    params(("id" = String, Path, description = "Order ID")),
    request_body = OwnerOrderUpdate,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "InvalidTransition", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "AccessDenied", body = crate::errors::ErrorResponse),
        (status = 404, description = "OrderNotFound", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Result<Json<OwnerOrderUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order_id = parse_order_id(&id)?;
    let update = json_body(body)?;
    let order = state
        .services
        .orders
        .update_for_owner(&user, order_id, update)
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/admin",
    summary = "All orders",
    description = "Unscoped order list for staff, newest first",
    params(AdminListQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 400, description = "Unknown status filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not an admin", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn admin_list_orders(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(OrderStatus::from_str(raw).map_err(|_| {
            ServiceError::ValidationError(format!("unknown order status: {raw}"))
        })?),
    };
    let orders = state.services.orders.list_all(status).await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(OrderResponse::from).collect(),
    )))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/admin/{id}",
    summary = "Update order status",
    description = "Moves fulfillment forward (skipping allowed) or cancels before shipment. Setting the current status again is a no-op.",
    params(("id" = String, Path, description = "Order ID")),
    request_body = AdminOrderUpdate,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "InvalidTransition or ValidationError", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not an admin", body = crate::errors::ErrorResponse),
        (status = 404, description = "OrderNotFound", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn admin_update_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    body: Result<Json<AdminOrderUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order_id = parse_order_id(&id)?;
    let update = json_body(body)?;
    let order = state
        .services
        .orders
        .admin_update(&admin, order_id, update)
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}
