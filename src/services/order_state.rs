//! Transition tables for the two independent order axes.

use crate::errors::ServiceError;
use crate::models::order::{OrderStatus, PaymentStatus};

/// Who is asking for a fulfillment status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Actor {
    Owner,
    Admin,
    /// The payment confirmation flow
    System,
}

/// Outcome of a transition check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition<S> {
    /// Apply the change from `from` to `to`
    Apply { from: S, to: S },
    /// Already in the requested state
    Unchanged,
}

pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Payment moves only out of `pending`, to `completed` or `failed`.
    pub fn payment_transition(
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<Transition<PaymentStatus>, ServiceError> {
        use PaymentStatus::*;

        if from == to || (from.is_paid() && to.is_paid()) {
            return Ok(Transition::Unchanged);
        }
        match (from, to) {
            (Pending, Completed) | (Pending, Failed) => Ok(Transition::Apply { from, to }),
            _ => Err(invalid("paymentStatus", from, to)),
        }
    }

    /// Fulfillment transitions.
    ///
    /// Forward moves follow pending, processing, shipped, delivered and may skip
    /// steps. `cancelled` is reachable only before shipment. Owners may only
    /// cancel; that restriction is enforced by the caller as an access rule.
    pub fn status_transition(
        from: OrderStatus,
        to: OrderStatus,
        actor: Actor,
    ) -> Result<Transition<OrderStatus>, ServiceError> {
        use OrderStatus::*;

        if from == to {
            return Ok(Transition::Unchanged);
        }
        if from.is_terminal() {
            return Err(invalid("status", from, to));
        }

        let allowed = match to {
            Cancelled => matches!(from, Pending | Processing),
            Pending => false,
            _ => match actor {
                Actor::Owner => false,
                Actor::Admin => rank(to) > rank(from),
                Actor::System => from == Pending && to == Processing,
            },
        };

        if allowed {
            Ok(Transition::Apply { from, to })
        } else {
            Err(invalid("status", from, to))
        }
    }

    /// Fulfillment change that rides along with a settled payment.
    ///
    /// A confirmed payment promotes a pending order to processing and a failed
    /// one cancels it. Orders that already left pending keep their status.
    pub fn status_for_payment(
        status: OrderStatus,
        payment: PaymentStatus,
    ) -> Option<(OrderStatus, OrderStatus)> {
        if status != OrderStatus::Pending {
            return None;
        }
        let target = match payment {
            PaymentStatus::Completed | PaymentStatus::Succeeded => OrderStatus::Processing,
            PaymentStatus::Failed => OrderStatus::Cancelled,
            _ => return None,
        };
        match Self::status_transition(status, target, Actor::System) {
            Ok(Transition::Apply { from, to }) => Some((from, to)),
            _ => None,
        }
    }
}

fn rank(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Processing => 1,
        OrderStatus::Shipped => 2,
        OrderStatus::Delivered => 3,
        OrderStatus::Cancelled => u8::MAX,
    }
}

fn invalid(axis: &'static str, from: impl ToString, to: impl ToString) -> ServiceError {
    ServiceError::InvalidTransition {
        axis,
        from: from.to_string(),
        to: to.to_string(),
    }
}
