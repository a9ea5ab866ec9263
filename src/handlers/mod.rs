pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod products;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::catalog::ProductCatalogService;
use crate::services::checkout::CheckoutService;
use crate::services::notifications::Mailer;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentGateway;
use crate::services::reconciliation::PaymentReconciliationService;
use std::sync::Arc;

/// Container wiring every service to the shared pool and event channel.
/// Gateway and mailer come in as trait objects so tests can substitute
/// scripted doubles.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub catalog: Arc<ProductCatalogService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciliation: Arc<PaymentReconciliationService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let orders = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let catalog = Arc::new(ProductCatalogService::new(db.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            orders.clone(),
            catalog.clone(),
            gateway.clone(),
            mailer,
            event_sender,
            config.email_from.clone(),
        ));
        let reconciliation = Arc::new(PaymentReconciliationService::new(
            db,
            orders.clone(),
            gateway,
        ));
        Self {
            orders,
            catalog,
            checkout,
            reconciliation,
        }
    }
}
