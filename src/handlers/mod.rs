pub mod health;
pub mod orders;
pub mod payment_webhooks;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::repositories::OrderRepository;
use crate::services::{
    catalog::CatalogLookup,
    checkout::{CheckoutCoordinator, CheckoutSettings},
    orders::OrderService,
    payment_gateway::PaymentGateway,
    pricing::PriceReconciler,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutCoordinator>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Wires the checkout and order services over one repository.
    ///
    /// The catalog and gateway are injected so tests can substitute in-memory
    /// fakes for the menu table and the hosted checkout provider.
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogLookup>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        config: &AppConfig,
    ) -> Self {
        let orders = OrderRepository::new(db);
        let reconciler =
            PriceReconciler::new(catalog).with_max_quantity(config.max_line_quantity);

        let checkout = Arc::new(CheckoutCoordinator::new(
            reconciler,
            gateway.clone(),
            orders.clone(),
            events.clone(),
            CheckoutSettings::from(config),
        ));
        let order_service = Arc::new(OrderService::new(orders, gateway, events));

        Self {
            checkout,
            orders: order_service,
        }
    }
}
