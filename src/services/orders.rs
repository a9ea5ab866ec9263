use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus};
use crate::entities::{order_item, payment_event};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::payments::{normalize_status, GatewayPayment, PaymentMethod};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Line item captured at checkout time. `product_id` is absent when the
/// catalog had no unambiguous match for the requested name.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Option<Uuid>,
    pub quantity: i32,
    pub price: Decimal,
    pub size: String,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub customer_email: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub idempotency_key: Option<String>,
    pub item: Option<NewOrderItem>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub quantity: i32,
    pub price_at_purchase: Decimal,
    pub size: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
    pub fn from_model(
        model: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<Self, ServiceError> {
        let status = model.order_status()?;
        Ok(Self {
            id: model.id,
            status,
            total_amount: model.total_amount,
            currency: model.currency,
            payment_method: model.payment_method,
            payment_id: model.payment_id,
            payment_status: model.payment_status,
            created_at: model.created_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price_at_purchase: item.price_at_purchase,
                    size: item.size,
                })
                .collect(),
        })
    }
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates the order row and its item in one transaction. The order
    /// starts `pending`; either both rows land or neither does.
    #[instrument(skip(self, new_order), fields(customer_id = %new_order.customer_id))]
    pub async fn create_order(&self, new_order: NewOrder) -> Result<order::Model, ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let order_model = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(new_order.customer_id),
            customer_email: Set(new_order.customer_email.clone()),
            status: Set(OrderStatus::Pending.to_string()),
            total_amount: Set(new_order.total_amount),
            currency: Set(new_order.currency.clone()),
            payment_method: Set(new_order.payment_method.as_str().to_string()),
            payment_id: Set(None),
            payment_status: Set(None),
            idempotency_key: Set(new_order.idempotency_key.clone()),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        };

        let item = new_order.item.clone();
        let saved = self
            .db
            .transaction::<_, order::Model, sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let saved = order_model.insert(txn).await?;
                    if let Some(item) = item {
                        order_item::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            order_id: Set(order_id),
                            product_id: Set(item.product_id),
                            quantity: Set(item.quantity),
                            price_at_purchase: Set(item.price),
                            size: Set(item.size),
                            created_at: Set(now),
                        }
                        .insert(txn)
                        .await?;
                    }
                    Ok(saved)
                })
            })
            .await
            .map_err(|e| {
                error!("Failed to persist order: {}", e);
                ServiceError::OrderPersistence(e.to_string())
            })?;

        info!(%order_id, "Order created");
        self.event_sender
            .send(Event::OrderCreated { order_id })
            .await;
        Ok(saved)
    }

    /// Looks up a prior submission with the same client idempotency key.
    pub async fn find_by_idempotency_key(
        &self,
        customer_id: Uuid,
        key: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Applies a gateway-reported outcome to the order: updates payment
    /// fields and status, and appends the payment event, in one transaction.
    ///
    /// The status write is guarded by the transition rules; an outcome that
    /// would move a terminal order backwards records the event but leaves
    /// the order untouched.
    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    pub async fn record_payment_outcome(
        &self,
        order_id: Uuid,
        payment: &GatewayPayment,
    ) -> Result<order::Model, ServiceError> {
        let target = normalize_status(&payment.raw_status);
        let payment = payment.clone();

        let (updated, old_status) = self
            .db
            .transaction::<_, (order::Model, OrderStatus), sea_orm::DbErr>(move |txn| {
                Box::pin(async move {
                    let existing = order::Entity::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            sea_orm::DbErr::RecordNotFound(format!("order {}", order_id))
                        })?;
                    let current = existing
                        .order_status()
                        .map_err(|e| sea_orm::DbErr::Custom(e.to_string()))?;

                    let now = Utc::now();
                    let next = if current.can_transition_to(target) {
                        target
                    } else {
                        current
                    };

                    let version = existing.version;
                    let mut active: order::ActiveModel = existing.into();
                    active.payment_id = Set(Some(payment.id.clone()));
                    active.payment_status = Set(Some(payment.raw_status.clone()));
                    active.status = Set(next.to_string());
                    active.updated_at = Set(Some(now));
                    active.version = Set(version + 1);
                    let updated = active.update(txn).await?;

                    payment_event::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_id: Set(order_id),
                        payment_id: Set(payment.id.clone()),
                        raw_status: Set(payment.raw_status.clone()),
                        payload: Set(serde_json::to_value(&payment)
                            .unwrap_or(serde_json::Value::Null)),
                        applied: Set(true),
                        created_at: Set(now),
                        applied_at: Set(Some(now)),
                    }
                    .insert(txn)
                    .await?;

                    Ok((updated, current))
                })
            })
            .await
            .map_err(|e| match e {
                sea_orm::TransactionError::Connection(db) => ServiceError::ReconciliationWrite {
                    order_id,
                    source: db,
                },
                sea_orm::TransactionError::Transaction(db) => ServiceError::ReconciliationWrite {
                    order_id,
                    source: db,
                },
            })?;

        let new_status = updated.order_status()?;
        if new_status != old_status {
            self.event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: new_status.to_string(),
                })
                .await;
            match new_status {
                OrderStatus::Confirmed => {
                    self.event_sender
                        .send(Event::PaymentConfirmed { order_id })
                        .await
                }
                OrderStatus::Cancelled => {
                    self.event_sender
                        .send(Event::PaymentRejected { order_id })
                        .await
                }
                OrderStatus::AwaitingPayment => {
                    self.event_sender
                        .send(Event::PaymentPending { order_id })
                        .await
                }
                OrderStatus::Pending => {}
            }
        } else if target != old_status {
            warn!(
                %order_id,
                status = %old_status,
                target = %target,
                "Payment outcome recorded but ignored by transition rules"
            );
        }

        Ok(updated)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Fetches an order only if it belongs to the given customer. Orders of
    /// other customers are indistinguishable from missing ones.
    pub async fn get_order_for_customer(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        order::Entity::find()
            .filter(order::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}
