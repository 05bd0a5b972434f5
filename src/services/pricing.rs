//! Server-side pricing.
//!
//! Cart lines submitted by clients are only hints: [`PriceReconciler`] rebuilds
//! every line from the catalog and [`compute_totals`] derives the amounts that
//! are persisted and charged.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::order::OrderLineItem;
use crate::services::catalog::CatalogLookup;

/// A cart line as submitted at checkout.
///
/// Any `price` or `name` the client sends alongside is not part of this type and
/// is dropped during deserialization.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(alias = "_id", alias = "id")]
    pub item_id: String,
    /// Raw quantity; normalized by [`normalize_quantity`]
    #[serde(default)]
    #[schema(value_type = Option<u32>)]
    pub quantity: Option<Value>,
}

impl CartLine {
    pub fn new(item_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity: Some(Value::from(quantity)),
        }
    }
}

/// Interprets a client-supplied quantity.
///
/// Missing, non-numeric, non-finite and sub-1 values become 1. Fractional values
/// are truncated. Numeric strings are accepted.
pub fn normalize_quantity(raw: Option<&Value>) -> u32 {
    let parsed = match raw {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| v as f64)
            .or_else(|| n.as_f64()),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() && v >= 1.0 => {
            if v >= u32::MAX as f64 {
                u32::MAX
            } else {
                v.trunc() as u32
            }
        }
        _ => 1,
    }
}

/// Rounds a money amount to two places, half away from zero, at scale 2.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Tax, shipping and minimum-order settings applied at checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub shipping_fee: Decimal,
    pub minimum_order_amount: Decimal,
}

impl From<&AppConfig> for PricingPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tax_rate: cfg.tax_rate,
            shipping_fee: cfg.shipping_fee,
            minimum_order_amount: cfg.minimum_order_amount,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

/// Computes subtotal, tax, shipping and total for reconciled lines.
///
/// Each component is rounded first and the total is their exact sum, so
/// `total == subtotal + tax + shipping` holds for the stored values.
pub fn compute_totals(lines: &[OrderLineItem], policy: &PricingPolicy) -> OrderTotals {
    let subtotal = round_money(lines.iter().map(OrderLineItem::line_total).sum());
    let tax = round_money(subtotal * policy.tax_rate);
    let shipping = round_money(policy.shipping_fee);

    OrderTotals {
        subtotal,
        tax,
        shipping,
        total: subtotal + tax + shipping,
    }
}

/// Largest quantity accepted on a single cart line unless configured otherwise.
pub const DEFAULT_MAX_LINE_QUANTITY: u32 = 100;

/// Rebuilds order lines from cart lines using catalog data only.
#[derive(Clone)]
pub struct PriceReconciler {
    catalog: Arc<dyn CatalogLookup>,
    max_quantity: u32,
}

impl PriceReconciler {
    pub fn new(catalog: Arc<dyn CatalogLookup>) -> Self {
        Self {
            catalog,
            max_quantity: DEFAULT_MAX_LINE_QUANTITY,
        }
    }

    pub fn with_max_quantity(mut self, max_quantity: u32) -> Self {
        self.max_quantity = max_quantity;
        self
    }

    /// Fails with `ItemNotFound` on the first unknown item id and with
    /// `ValidationError` when a line asks for more than the per-line maximum.
    #[instrument(skip(self, cart), fields(lines = cart.len()))]
    pub async fn reconcile(&self, cart: &[CartLine]) -> Result<Vec<OrderLineItem>, ServiceError> {
        let mut lines = Vec::with_capacity(cart.len());

        for line in cart {
            let item_id = line.item_id.trim();
            let item = self.catalog.lookup(item_id).await?.ok_or_else(|| {
                warn!(item_id, "checkout references unknown menu item");
                ServiceError::ItemNotFound(item_id.to_string())
            })?;

            let quantity = normalize_quantity(line.quantity.as_ref());
            if quantity > self.max_quantity {
                warn!(item_id, quantity, max = self.max_quantity, "cart line quantity over limit");
                return Err(ServiceError::ValidationError(format!(
                    "quantity for {item_id} must not exceed {}",
                    self.max_quantity
                )));
            }

            lines.push(OrderLineItem {
                item_id: item_id.to_string(),
                name: item.name,
                unit_price: round_money(item.unit_price),
                quantity,
            });
        }

        Ok(lines)
    }
}
