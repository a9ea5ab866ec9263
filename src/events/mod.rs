use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Domain events emitted by the services. Consumed by the in-process logging
/// loop; the channel seam is where an outbound bus would attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated { order_id: Uuid },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    CheckoutCompleted {
        order_id: Uuid,
        payment_id: String,
    },
    PaymentConfirmed { order_id: Uuid },
    PaymentRejected { order_id: Uuid },
    PaymentPending { order_id: Uuid },
    ProductCreated { product_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Fire-and-forget publish. A full or closed channel is logged, never
    /// propagated; events are advisory.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.tx.send(event).await {
            error!("Failed to publish event: {}", e);
        }
    }
}

pub fn event_channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            Event::CheckoutCompleted {
                order_id,
                payment_id,
            } => {
                info!(%order_id, %payment_id, "Checkout completed");
            }
            other => debug!(event = ?other, "Event processed"),
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_through_channel() {
        let (sender, mut rx) = event_channel(8);
        let id = Uuid::new_v4();
        sender.send(Event::OrderCreated { order_id: id }).await;
        match rx.recv().await {
            Some(Event::OrderCreated { order_id }) => assert_eq!(order_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::PaymentConfirmed {
            order_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "payment_confirmed");
        assert_eq!(json["order_id"], Uuid::nil().to_string());
    }
}
