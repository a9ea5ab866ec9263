use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter as StrumEnumIter, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of an order as driven by the payment outcome.
///
/// `pending` is the sole initial state, entered the instant the row is
/// created and before the gateway is called. `confirmed` and `cancelled`
/// are terminal; `awaiting_payment` waits on an out-of-band PIX payment or
/// card authorization and is moved forward by the webhook/reconciler.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    StrumEnumIter,
    ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    AwaitingPayment,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }

    /// Transitions are monotonic: a terminal state never moves back to a
    /// non-terminal one, and `awaiting_payment` only resolves forward.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => next != OrderStatus::Pending,
            OrderStatus::AwaitingPayment => next.is_terminal(),
            OrderStatus::Confirmed | OrderStatus::Cancelled => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_email: String,
    pub status: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    /// Processor-assigned payment id; null until the gateway responds.
    pub payment_id: Option<String>,
    /// Raw status string as reported by the processor.
    pub payment_status: Option<String>,
    /// Client-supplied token deduplicating checkout submissions.
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

impl Model {
    pub fn order_status(&self) -> Result<OrderStatus, DbErr> {
        self.status
            .parse()
            .map_err(|_| DbErr::Custom(format!("invalid order status '{}'", self.status)))
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::payment_event::Entity")]
    PaymentEvent,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::payment_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentEvent.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
