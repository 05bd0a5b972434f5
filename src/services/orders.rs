use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AccessGuard, AuthUser};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::repositories::{OrderRepository, PaymentReference};
use crate::services::order_state::{Actor, OrderStateMachine, Transition};
use crate::services::payment_gateway::PaymentGateway;

/// Conditional status updates are retried this many times when another
/// writer changes the row between our read and our write.
const STATUS_UPDATE_ATTEMPTS: usize = 3;

/// Body of `PUT /orders/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OwnerOrderUpdate {
    pub status: OrderStatus,
    /// Correlation email checked against the order contact
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of `PUT /orders/admin/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderUpdate {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub expected_delivery_date: Option<DateTime<Utc>>,
}

/// Result of a confirmation attempt.
#[derive(Debug, Clone)]
pub struct ConfirmationOutcome {
    pub order: Order,
    /// True only for the call that moved payment from pending to completed
    pub transitioned: bool,
}

/// Order reads, status edits and payment confirmation.
#[derive(Clone)]
pub struct OrderService {
    orders: OrderRepository,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
}

impl OrderService {
    pub fn new(
        orders: OrderRepository,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
    ) -> Self {
        Self {
            orders,
            gateway,
            events,
        }
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn list_for_owner(&self, principal: &AuthUser) -> Result<Vec<Order>, ServiceError> {
        self.orders.list_by_owner(&principal.user_id).await
    }

    #[instrument(skip(self, principal, email), fields(user_id = %principal.user_id))]
    pub async fn get_for_owner(
        &self,
        principal: &AuthUser,
        order_id: Uuid,
        email: Option<&str>,
    ) -> Result<Order, ServiceError> {
        let order = self.load(order_id).await?;
        AccessGuard::ensure_read(&principal.user_id, &order, email)?;
        Ok(order)
    }

    /// Owners may only cancel, and only while the order has not shipped.
    #[instrument(skip(self, principal, update), fields(user_id = %principal.user_id, status = %update.status))]
    pub async fn update_for_owner(
        &self,
        principal: &AuthUser,
        order_id: Uuid,
        update: OwnerOrderUpdate,
    ) -> Result<Order, ServiceError> {
        let order = self.load(order_id).await?;
        AccessGuard::ensure_write(&principal.user_id, &order, update.email.as_deref())?;

        if update.status != OrderStatus::Cancelled {
            return Err(ServiceError::AccessDenied(format!(
                "customers cannot set order status to {}",
                update.status
            )));
        }

        self.change_status(order_id, update.status, Actor::Owner, None)
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, ServiceError> {
        self.orders.list_all(status).await
    }

    /// Administrative edit: ownership is not checked, the state machine is.
    #[instrument(skip(self, admin, update), fields(admin_id = %admin.user_id))]
    pub async fn admin_update(
        &self,
        admin: &AuthUser,
        order_id: Uuid,
        update: AdminOrderUpdate,
    ) -> Result<Order, ServiceError> {
        match (update.status, update.expected_delivery_date) {
            (None, None) => Err(ServiceError::ValidationError(
                "status or expectedDeliveryDate is required".to_string(),
            )),
            (Some(status), date) => {
                self.change_status(order_id, status, Actor::Admin, date)
                    .await
            }
            (None, Some(date)) => {
                if !self.orders.set_expected_delivery_date(order_id, date).await? {
                    return Err(ServiceError::OrderNotFound(order_id.to_string()));
                }
                self.load(order_id).await
            }
        }
    }

    /// Applies a fulfillment transition with a conditional update, re-reading
    /// and re-validating when another writer got there first.
    async fn change_status(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        actor: Actor,
        expected_delivery_date: Option<DateTime<Utc>>,
    ) -> Result<Order, ServiceError> {
        for attempt in 1..=STATUS_UPDATE_ATTEMPTS {
            let current = self.load(order_id).await?;

            match OrderStateMachine::status_transition(current.status, to, actor)? {
                Transition::Unchanged => {
                    if let Some(date) = expected_delivery_date {
                        self.orders.set_expected_delivery_date(order_id, date).await?;
                        return self.load(order_id).await;
                    }
                    return Ok(current);
                }
                Transition::Apply { from, to } => {
                    if self
                        .orders
                        .update_status_if(order_id, from, to, expected_delivery_date)
                        .await?
                    {
                        info!(%order_id, %from, %to, ?actor, "order status changed");
                        self.events.publish(Event::OrderStatusChanged {
                            order_id,
                            old_status: from,
                            new_status: to,
                        });
                        return self.load(order_id).await;
                    }
                    debug!(%order_id, attempt, "status changed underneath us, re-reading");
                }
            }
        }

        warn!(%order_id, "giving up on status update after repeated conflicts");
        Err(ServiceError::InternalError(format!(
            "order {} is being modified concurrently",
            order_id
        )))
    }

    /// The single entry point for payment confirmation, used by the redirect
    /// endpoint and the gateway webhook alike.
    ///
    /// Safe to call any number of times, concurrently: at most one call reports
    /// `transitioned`, the others return the settled order.
    #[instrument(skip(self))]
    pub async fn confirm_session(&self, session_id: &str) -> Result<ConfirmationOutcome, ServiceError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ServiceError::ValidationError(
                "session_id is required".to_string(),
            ));
        }

        let order = self
            .orders
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(format!("no order for session {}", session_id)))?;

        if order.payment_status.is_paid() {
            return Ok(ConfirmationOutcome {
                order,
                transitioned: false,
            });
        }
        if order.payment_status == PaymentStatus::Failed {
            return Err(ServiceError::PaymentNotCompleted(session_id.to_string()));
        }

        let state = self.gateway.retrieve_session(session_id).await?;

        if state.paid {
            return self.settle_paid(order, session_id, state.payment_intent_id, state.transaction_id)
                .await;
        }

        if state.expired {
            OrderStateMachine::payment_transition(order.payment_status, PaymentStatus::Failed)?;
            let cancellation =
                OrderStateMachine::status_for_payment(order.status, PaymentStatus::Failed);
            if self.orders.fail_payment(order.id, cancellation).await? {
                counter!("food_order_payments.failed", 1);
                info!(order_id = %order.id, "gateway session expired, payment marked failed");
                self.events.publish(Event::PaymentFailed {
                    order_id: order.id,
                    session_id: session_id.to_string(),
                });
            }
        }

        Err(ServiceError::PaymentNotCompleted(session_id.to_string()))
    }

    async fn settle_paid(
        &self,
        order: Order,
        session_id: &str,
        payment_intent_id: Option<String>,
        transaction_id: Option<String>,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        if let Transition::Unchanged =
            OrderStateMachine::payment_transition(order.payment_status, PaymentStatus::Completed)?
        {
            return Ok(ConfirmationOutcome {
                order,
                transitioned: false,
            });
        }

        let reference = PaymentReference {
            payment_intent_id,
            transaction_id,
        };
        let promotion =
            OrderStateMachine::status_for_payment(order.status, PaymentStatus::Completed);
        let won = self
            .orders
            .complete_payment(order.id, &reference, promotion)
            .await?;
        let settled = self.load(order.id).await?;

        if !won {
            // Another confirmation got there first; anything but paid is a conflict
            if settled.payment_status.is_paid() {
                return Ok(ConfirmationOutcome {
                    order: settled,
                    transitioned: false,
                });
            }
            return Err(ServiceError::InvalidTransition {
                axis: "paymentStatus",
                from: settled.payment_status.to_string(),
                to: PaymentStatus::Completed.to_string(),
            });
        }

        counter!("food_order_payments.confirmed", 1);
        info!(order_id = %settled.id, "payment confirmed");
        self.events.publish(Event::PaymentConfirmed {
            order_id: settled.id,
            session_id: session_id.to_string(),
            confirmed_at: settled.updated_at,
        });
        if order.status != settled.status {
            self.events.publish(Event::OrderStatusChanged {
                order_id: settled.id,
                old_status: order.status,
                new_status: settled.status,
            });
        }

        Ok(ConfirmationOutcome {
            order: settled,
            transitioned: true,
        })
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))
    }
}
