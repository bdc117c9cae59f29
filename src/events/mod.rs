use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

pub use crate::entities::submission_history::SubmissionKind;

/// Domain events published by the services after their transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total: Decimal,
        payment_method: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        field: String,
        old_status: String,
        new_status: String,
        actor: String,
    },
    OrderCancelled {
        order_id: Uuid,
        restocked_units: i64,
    },
    PaymentCaptured {
        order_id: Uuid,
        provider_order_id: String,
        capture_id: String,
    },
    PaymentRefunded {
        order_id: Uuid,
    },
    ContactMessageReceived {
        id: Uuid,
        spam_score: u32,
        is_duplicate: bool,
    },
    SampleRequestReceived {
        id: Uuid,
        is_duplicate: bool,
    },
    SubmissionAutoClosed {
        kind: SubmissionKind,
        id: Uuid,
        reasons: Vec<String>,
    },
}

impl Event {
    /// Stable name used for metrics labels and log lines
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::PaymentCaptured { .. } => "payment_captured",
            Event::PaymentRefunded { .. } => "payment_refunded",
            Event::ContactMessageReceived { .. } => "contact_message_received",
            Event::SampleRequestReceived { .. } => "sample_request_received",
            Event::SubmissionAutoClosed { .. } => "submission_auto_closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort publish: a full or closed channel is logged, never surfaced.
    pub async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Consumes events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        crate::metrics::DOMAIN_EVENTS
            .with_label_values(&[event.name()])
            .inc();

        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                total,
                payment_method,
            } => info!(
                order_id = %order_id,
                order_number = %order_number,
                total = %total,
                payment_method = %payment_method,
                "order created"
            ),
            Event::OrderStatusChanged {
                order_id,
                field,
                old_status,
                new_status,
                actor,
            } => info!(
                order_id = %order_id,
                field = %field,
                from = %old_status,
                to = %new_status,
                actor = %actor,
                "order status changed"
            ),
            Event::OrderCancelled {
                order_id,
                restocked_units,
            } => info!(order_id = %order_id, restocked_units, "order cancelled"),
            Event::PaymentCaptured {
                order_id,
                provider_order_id,
                capture_id,
            } => info!(
                order_id = %order_id,
                provider_order_id = %provider_order_id,
                capture_id = %capture_id,
                "payment captured"
            ),
            Event::PaymentRefunded { order_id } => info!(order_id = %order_id, "payment refunded"),
            Event::ContactMessageReceived {
                id,
                spam_score,
                is_duplicate,
            } => info!(contact_id = %id, spam_score, is_duplicate, "contact message received"),
            Event::SampleRequestReceived { id, is_duplicate } => {
                info!(sample_id = %id, is_duplicate, "sample request received")
            }
            Event::SubmissionAutoClosed { kind, id, reasons } => warn!(
                kind = kind.as_ref(),
                submission_id = %id,
                reasons = ?reasons,
                "submission auto-closed"
            ),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_on_closed_channel_does_not_fail() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender
            .send(Event::PaymentRefunded {
                order_id: Uuid::new_v4()
            })
            .await
            .is_err());
        sender
            .publish(Event::PaymentRefunded {
                order_id: Uuid::new_v4(),
            })
            .await;
    }

    #[tokio::test]
    async fn processor_drains_and_stops() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(process_events(rx));
        let sender = EventSender::new(tx);
        sender
            .publish(Event::SampleRequestReceived {
                id: Uuid::new_v4(),
                is_duplicate: false,
            })
            .await;
        drop(sender);
        handle.await.unwrap();
    }
}
