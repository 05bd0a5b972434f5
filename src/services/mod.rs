// Catalog and pricing
pub mod catalog;
pub mod pricing;

// Payment gateway boundary
pub mod payment_gateway;

// Order lifecycle
pub mod checkout;
pub mod order_state;
pub mod orders;
