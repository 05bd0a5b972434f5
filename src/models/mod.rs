pub mod order;

pub use order::{
    Contact, Order, OrderLineItem, OrderStatus, PaymentMethod, PaymentStatus, ShippingAddress,
};
