pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    payments::PaymentGateway,
    services::{
        checkout::CheckoutService, orders::OrderService, reconciler::OrderReconciler,
    },
    webhooks::WebhookDispatcher,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<OrderReconciler>,
    pub orders: Arc<OrderService>,
    pub webhooks: Arc<WebhookDispatcher>,
}

impl AppServices {
    /// Wires every service over one pool, one gateway and one event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            gateway.clone(),
            config.currency.clone(),
        ));
        let reconciler = Arc::new(OrderReconciler::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
            config.payment_request_timeout(),
        ));
        let orders = Arc::new(OrderService::new(db_pool, event_sender.clone()));
        let webhooks = Arc::new(WebhookDispatcher::new(
            reconciler.clone(),
            orders.clone(),
            event_sender,
            config.payment_webhook_secret.clone(),
            Duration::from_secs(config.payment_webhook_tolerance_secs),
        ));

        Self {
            checkout,
            reconciler,
            orders,
            webhooks,
        }
    }
}
