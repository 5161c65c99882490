use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
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

    /// Sends an event, logging instead of failing when the consumer is gone.
    /// Order state is already committed by the time events fire.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Domain events emitted by the order pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        payment_intent_id: String,
        total: Decimal,
    },
    OrderRefunded {
        order_id: Uuid,
        payment_intent_id: String,
        refunded_at: DateTime<Utc>,
    },
    PaymentFailed {
        payment_intent_id: String,
        reason: Option<String>,
    },
}

/// Drains the event channel and logs each event.
///
/// Downstream consumers (fulfillment, email) subscribe here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                payment_intent_id,
                total,
            } => {
                info!(
                    %order_id,
                    %user_id,
                    payment_intent_id = %payment_intent_id,
                    %total,
                    "order created"
                );
            }
            Event::OrderRefunded {
                order_id,
                payment_intent_id,
                refunded_at,
            } => {
                info!(
                    %order_id,
                    payment_intent_id = %payment_intent_id,
                    %refunded_at,
                    "order refunded"
                );
            }
            Event::PaymentFailed {
                payment_intent_id,
                reason,
            } => {
                warn!(
                    payment_intent_id = %payment_intent_id,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "payment failed"
                );
            }
        }
    }

    info!("Event processing loop finished");
}
