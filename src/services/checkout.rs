use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::catalog::ProductCatalogService;
use crate::services::notifications::{order_outcome_email, EmailMessage, Mailer};
use crate::services::orders::{NewOrder, NewOrderItem, OrderService};
use crate::services::payments::{
    normalize_status, CardPayment, GatewayPayment, PayerInfo, PaymentGateway, PaymentMethod,
    PaymentRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub customer_id: Uuid,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub product_name: Option<String>,
    pub size: String,
    pub quantity: i32,
    pub payer: PayerInfo,
    pub card: Option<CardPayment>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub payment: GatewayPayment,
    /// True when an idempotent resubmission returned the earlier result
    /// instead of charging again.
    pub resumed: bool,
}

/// Orchestrates a purchase: order persistence, the gateway charge, outcome
/// reconciliation and the notification email, in that order. Each step's
/// failure mode is deliberate — see the per-step comments.
pub struct CheckoutService {
    orders: Arc<OrderService>,
    catalog: Arc<ProductCatalogService>,
    gateway: Arc<dyn PaymentGateway>,
    mailer: Arc<dyn Mailer>,
    event_sender: EventSender,
    email_from: String,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderService>,
        catalog: Arc<ProductCatalogService>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        event_sender: EventSender,
        email_from: String,
    ) -> Self {
        Self {
            orders,
            catalog,
            gateway,
            mailer,
            event_sender,
            email_from,
        }
    }

    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn checkout(&self, input: CheckoutInput) -> Result<CheckoutOutcome, ServiceError> {
        if input.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "transaction amount must be positive".to_string(),
            ));
        }
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        // An idempotency key that already produced a payment short-circuits
        // to the stored outcome; a key whose earlier attempt died before the
        // gateway call resumes that order instead of creating another.
        let resumed_order = match &input.idempotency_key {
            Some(key) => {
                match self
                    .orders
                    .find_by_idempotency_key(input.customer_id, key)
                    .await?
                {
                    Some(existing) if existing.payment_id.is_some() => {
                        info!(order_id = %existing.id, "Duplicate checkout returned stored outcome");
                        return self.stored_outcome(existing).await;
                    }
                    Some(existing) => Some(existing),
                    None => None,
                }
            }
            None => None,
        };

        let order = match resumed_order {
            Some(order) => order,
            None => {
                // Resolver failures never block the purchase; without an
                // unambiguous match the order simply has no line item.
                let product = match &input.product_name {
                    Some(name) => self.catalog.resolve_by_name(name).await?,
                    None => None,
                };

                self.orders
                    .create_order(NewOrder {
                        customer_id: input.customer_id,
                        customer_email: input.customer_email.clone(),
                        total_amount: input.amount,
                        currency: input.currency.clone(),
                        payment_method: input.method,
                        idempotency_key: input.idempotency_key.clone(),
                        item: product.map(|p| NewOrderItem {
                            product_id: Some(p.id),
                            quantity: input.quantity,
                            price: input.amount,
                            size: input.size.clone(),
                        }),
                    })
                    .await?
            }
        };

        // A gateway failure leaves the order pending; the caller may retry
        // with the same idempotency key.
        let request = PaymentRequest {
            order_id: order.id,
            amount: input.amount,
            method: input.method,
            description: input
                .product_name
                .clone()
                .unwrap_or_else(|| "Pedido GolClub".to_string()),
            payer: input.payer.clone(),
            card: input.card.clone(),
            idempotency_key: input.idempotency_key.clone(),
        };
        let payment = self.gateway.create_payment(&request).await.map_err(|e| {
            warn!(order_id = %order.id, "Gateway call failed; order left pending");
            e
        })?;

        // The charge may already exist at the processor, so a failed local
        // write is logged and the caller still gets the real outcome; the
        // webhook or reconciler repairs the row later.
        let status = match self.orders.record_payment_outcome(order.id, &payment).await {
            Ok(updated) => updated.order_status()?,
            Err(e @ ServiceError::ReconciliationWrite { .. }) => {
                error!(order_id = %order.id, error = %e, "Payment outcome write failed after charge");
                normalize_status(&payment.raw_status)
            }
            Err(e) => return Err(e),
        };

        self.send_outcome_email(&order, status, input.customer_name.as_deref())
            .await;

        self.event_sender
            .send(Event::CheckoutCompleted {
                order_id: order.id,
                payment_id: payment.id.clone(),
            })
            .await;

        Ok(CheckoutOutcome {
            order_id: order.id,
            status,
            payment,
            resumed: false,
        })
    }

    /// Rebuilds the checkout response for a duplicate submission from the
    /// stored order, re-fetching the gateway record so PIX codes survive a
    /// page reload.
    async fn stored_outcome(&self, order: order::Model) -> Result<CheckoutOutcome, ServiceError> {
        let status = order.order_status()?;
        let payment_id = order.payment_id.clone().ok_or_else(|| {
            ServiceError::InternalError("stored outcome without payment id".to_string())
        })?;

        let payment = match self.gateway.get_payment(&payment_id).await {
            Ok(payment) => payment,
            Err(e) => {
                // Degrade to what the order row knows.
                warn!(order_id = %order.id, error = %e, "Could not re-fetch stored payment");
                GatewayPayment {
                    id: payment_id,
                    raw_status: order.payment_status.clone().unwrap_or_default(),
                    external_reference: Some(order.id.to_string()),
                    qr_code: None,
                    qr_code_base64: None,
                    ticket_url: None,
                }
            }
        };

        Ok(CheckoutOutcome {
            order_id: order.id,
            status,
            payment,
            resumed: true,
        })
    }

    /// Best effort only: a failed email never changes the checkout result.
    async fn send_outcome_email(
        &self,
        order: &order::Model,
        status: OrderStatus,
        customer_name: Option<&str>,
    ) {
        let (subject, html) = order_outcome_email(
            order.id,
            status,
            order.total_amount,
            &order.payment_method,
            customer_name,
        );
        let message = EmailMessage {
            from: self.email_from.clone(),
            to: vec![order.customer_email.clone()],
            subject,
            html,
        };
        if let Err(e) = self.mailer.send(&message).await {
            warn!(order_id = %order.id, error = %e, "Order email failed; continuing");
        }
    }
}
