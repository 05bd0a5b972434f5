use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::order::{
    Contact, Order, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
use crate::repositories::OrderRepository;
use crate::services::payment_gateway::{
    build_line_items, to_minor_units, CheckoutSessionRequest, GatewaySession, PaymentGateway,
};
use crate::services::pricing::{
    compute_totals, round_money, CartLine, OrderTotals, PriceReconciler, PricingPolicy,
};

/// Body of `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate]
    pub contact: Contact,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub items: Vec<CartLine>,
    /// Client-computed amounts, compared against the server's for reporting only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub subtotal: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub tax: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub total: Option<Decimal>,
}

impl CreateOrderRequest {
    fn declared_differs(&self, computed: &OrderTotals) -> bool {
        let differs = |declared: Option<Decimal>, actual: Decimal| {
            declared.map_or(false, |d| round_money(d) != actual)
        };
        differs(self.subtotal, computed.subtotal)
            || differs(self.tax, computed.tax)
            || differs(self.total, computed.total)
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: Order,
    /// Hosted checkout page for online payments
    pub redirect_url: Option<String>,
    pub declared_total_mismatch: bool,
}

#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    pub policy: PricingPolicy,
    pub currency: String,
    pub frontend_url: String,
    pub deferred_initial_status: OrderStatus,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            policy: PricingPolicy::from(cfg),
            currency: cfg.currency.to_ascii_lowercase(),
            frontend_url: cfg.frontend_url.clone(),
            deferred_initial_status: cfg.deferred_initial_status(),
        }
    }
}

impl CheckoutSettings {
    fn success_url(&self) -> String {
        format!(
            "{}/myorder/verify?success=true&session_id={{CHECKOUT_SESSION_ID}}",
            self.frontend_url.trim_end_matches('/')
        )
    }

    fn cancel_url(&self) -> String {
        format!(
            "{}/checkout?payment_status=cancel",
            self.frontend_url.trim_end_matches('/')
        )
    }
}

/// Turns a cart into a persisted order.
///
/// Nothing is written until every check has passed and, for online payment,
/// the gateway session exists. A failed gateway call leaves no order behind.
#[derive(Clone)]
pub struct CheckoutCoordinator {
    reconciler: PriceReconciler,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderRepository,
    events: EventSender,
    settings: CheckoutSettings,
}

impl CheckoutCoordinator {
    pub fn new(
        reconciler: PriceReconciler,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderRepository,
        events: EventSender,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            reconciler,
            gateway,
            orders,
            events,
            settings,
        }
    }

    #[instrument(skip(self, principal, request), fields(owner_id = %principal.user_id, payment_method = %request.payment_method))]
    pub async fn place_order(
        &self,
        principal: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        request.validate()?;

        if request.items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let lines = self.reconciler.reconcile(&request.items).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let totals = compute_totals(&lines, &self.settings.policy);
        let minimum = round_money(self.settings.policy.minimum_order_amount);
        if totals.total < minimum {
            return Err(ServiceError::BelowMinimumOrder {
                total: totals.total,
                minimum,
            });
        }

        let declared_total_mismatch = request.declared_differs(&totals);
        if declared_total_mismatch {
            warn!(
                declared_total = ?request.total,
                computed_total = %totals.total,
                "client-declared amounts differ from server pricing"
            );
        }

        let now = Utc::now();
        let mut order = Order {
            id: Uuid::new_v4(),
            owner_id: principal.user_id.clone(),
            contact: request.contact.normalized(),
            shipping_address: request.shipping_address.normalized(),
            lines,
            payment_method: request.payment_method,
            payment_status: PaymentStatus::Processing,
            status: self.settings.deferred_initial_status,
            gateway_session_id: None,
            gateway_payment_intent_id: None,
            gateway_transaction_id: None,
            subtotal: totals.subtotal,
            tax: totals.tax,
            shipping: totals.shipping,
            total: totals.total,
            currency: self.settings.currency.clone(),
            expected_delivery_date: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let mut redirect_url = None;
        if order.payment_method.is_online() {
            let session = self.open_gateway_session(&order, &totals).await?;
            order.payment_status = PaymentStatus::Pending;
            order.status = OrderStatus::Pending;
            order.gateway_session_id = Some(session.session_id);
            order.gateway_payment_intent_id = session.payment_intent_id;
            redirect_url = Some(session.redirect_url);
        }

        let order = self.orders.insert(&order).await.map_err(|e| {
            if let Some(session_id) = &order.gateway_session_id {
                error!(%session_id, error = %e, "order insert failed after gateway session was opened");
            }
            e
        })?;

        counter!("food_order_orders.created", 1, "payment_method" => order.payment_method.to_string());
        info!(order_id = %order.id, total = %order.total, "order placed");
        self.events.publish(Event::OrderCreated {
            order_id: order.id,
            payment_method: order.payment_method,
            total: order.total,
        });

        Ok(CheckoutOutcome {
            order,
            redirect_url,
            declared_total_mismatch,
        })
    }

    async fn open_gateway_session(
        &self,
        order: &Order,
        totals: &OrderTotals,
    ) -> Result<GatewaySession, ServiceError> {
        let request = CheckoutSessionRequest {
            line_items: build_line_items(&order.lines, totals)?,
            total_minor_units: to_minor_units(totals.total)?,
            currency: self.settings.currency.clone(),
            success_url: self.settings.success_url(),
            cancel_url: self.settings.cancel_url(),
            customer_email: order.contact.email.clone(),
            client_reference_id: Some(order.id.to_string()),
        };

        self.gateway.create_session(request).await.map_err(|e| {
            warn!(order_id = %order.id, error = %e, "could not open gateway session");
            ServiceError::from(e)
        })
    }
}
