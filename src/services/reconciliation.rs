use crate::db::DbPool;
use crate::entities::payment_event;
use crate::errors::ServiceError;
use crate::services::orders::OrderService;
use crate::services::payments::{GatewayPayment, PaymentGateway};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Applies gateway-reported payment states to orders, from webhook
/// deliveries and from the periodic sweep over events whose original apply
/// failed. Every reported state lands in `payment_events` before the order
/// row is touched, so a crash between the two is repairable.
pub struct PaymentReconciliationService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentReconciliationService {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
        }
    }

    /// Handles a webhook notification carrying only the processor's payment
    /// id: fetches the full payment and ingests it.
    #[instrument(skip(self))]
    pub async fn ingest_by_payment_id(&self, payment_id: &str) -> Result<(), ServiceError> {
        let payment = self.gateway.get_payment(payment_id).await?;
        self.ingest(&payment).await
    }

    /// Records a gateway-reported payment state and applies it to its order.
    ///
    /// The order is located by the stored payment id, falling back to the
    /// order id echoed in `external_reference` (the first notification for a
    /// payment can arrive before checkout stored the id). A payment that
    /// matches no order is logged and dropped, never an error, so replayed
    /// or foreign notifications cannot make the endpoint fail.
    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    pub async fn ingest(&self, payment: &GatewayPayment) -> Result<(), ServiceError> {
        let order = match self.orders.find_by_payment_id(&payment.id).await? {
            Some(order) => Some(order),
            None => match payment
                .external_reference
                .as_deref()
                .and_then(|r| Uuid::parse_str(r).ok())
            {
                Some(order_id) => self.orders.get_order(order_id).await?,
                None => None,
            },
        };

        let Some(order) = order else {
            warn!(payment_id = %payment.id, "Payment matches no known order; dropping");
            return Ok(());
        };

        match self.orders.record_payment_outcome(order.id, payment).await {
            Ok(_) => Ok(()),
            Err(e @ ServiceError::ReconciliationWrite { .. }) => {
                // Park the event unapplied; the sweep retries it.
                error!(order_id = %order.id, error = %e, "Apply failed; parking payment event");
                self.park_event(order.id, payment).await
            }
            Err(e) => Err(e),
        }
    }

    async fn park_event(
        &self,
        order_id: Uuid,
        payment: &GatewayPayment,
    ) -> Result<(), ServiceError> {
        payment_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            payment_id: Set(payment.id.clone()),
            raw_status: Set(payment.raw_status.clone()),
            payload: Set(serde_json::to_value(payment).unwrap_or(serde_json::Value::Null)),
            applied: Set(false),
            created_at: Set(Utc::now()),
            applied_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .map_err(|source| ServiceError::ReconciliationWrite { order_id, source })?;
        Ok(())
    }

    /// One sweep: re-applies parked events oldest first. Returns how many
    /// were applied.
    #[instrument(skip(self))]
    pub async fn apply_pending(&self, batch_size: u64) -> Result<usize, ServiceError> {
        let pending = payment_event::Entity::find()
            .filter(payment_event::Column::Applied.eq(false))
            .order_by_asc(payment_event::Column::CreatedAt)
            .limit(batch_size)
            .all(&*self.db)
            .await?;

        let mut applied = 0;
        for event in pending {
            let payment: GatewayPayment = match serde_json::from_value(event.payload.clone()) {
                Ok(payment) => payment,
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "Unreadable parked payment event");
                    continue;
                }
            };

            match self
                .orders
                .record_payment_outcome(event.order_id, &payment)
                .await
            {
                Ok(_) => {
                    let mut active: payment_event::ActiveModel = event.into();
                    active.applied = Set(true);
                    active.applied_at = Set(Some(Utc::now()));
                    active.update(&*self.db).await?;
                    applied += 1;
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Parked event still failing");
                }
            }
        }

        if applied > 0 {
            info!(applied, "Reconciliation sweep applied parked events");
        }
        Ok(applied)
    }
}

/// Spawns the periodic reconciliation sweep.
pub fn start_worker(
    service: Arc<PaymentReconciliationService>,
    interval_secs: u64,
    batch_size: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        info!(interval_secs, "Payment reconciliation worker started");
        loop {
            interval.tick().await;
            if let Err(e) = service.apply_pending(batch_size).await {
                error!("Reconciliation sweep failed: {}", e);
            }
        }
    })
}
