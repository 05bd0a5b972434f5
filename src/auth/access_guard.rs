use crate::errors::ServiceError;
use crate::models::order::Order;

/// Ownership rules for customer-facing order operations.
///
/// A principal may read or edit an order only if it placed it. When the caller
/// also supplies a correlation email it must match the order's contact email
/// (case-insensitive); a blank email counts as not supplied. Admin operations do
/// not go through this guard.
pub struct AccessGuard;

impl AccessGuard {
    pub fn can_read(principal_id: &str, order: &Order, supplied_email: Option<&str>) -> bool {
        if order.owner_id != principal_id {
            return false;
        }
        match supplied_email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) => email.eq_ignore_ascii_case(&order.contact.email),
            None => true,
        }
    }

    pub fn can_write(principal_id: &str, order: &Order, supplied_email: Option<&str>) -> bool {
        Self::can_read(principal_id, order, supplied_email)
    }

    pub fn ensure_read(
        principal_id: &str,
        order: &Order,
        supplied_email: Option<&str>,
    ) -> Result<(), ServiceError> {
        if Self::can_read(principal_id, order, supplied_email) {
            Ok(())
        } else {
            Err(denied(order))
        }
    }

    pub fn ensure_write(
        principal_id: &str,
        order: &Order,
        supplied_email: Option<&str>,
    ) -> Result<(), ServiceError> {
        if Self::can_write(principal_id, order, supplied_email) {
            Ok(())
        } else {
            Err(denied(order))
        }
    }
}

// Never mention the actual owner
fn denied(order: &Order) -> ServiceError {
    ServiceError::AccessDenied(format!("order {} is not accessible", order.id))
}
