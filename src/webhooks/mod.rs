//! Inbound payment provider webhooks.
//!
//! Verification runs on the raw bytes before anything parses them. After a
//! signature checks out, processing problems are logged and never change the
//! acknowledgement the provider receives.

pub mod signature;

use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::metadata;
use crate::services::orders::OrderService;
use crate::services::reconciler::OrderReconciler;

pub use signature::{SignatureError, SIGNATURE_HEADER};

pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const CHARGE_REFUNDED: &str = "charge.refunded";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: Value,
}

/// What happened to a verified delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    OrderCreated,
    OrderAlreadyExisted,
    ReconcileFailed,
    MissingOwner,
    PaymentFailureRecorded,
    Refunded,
    RefundWithoutOrder,
    RefundFailed,
    Ignored,
    Unparseable,
}

/// Verifies and routes provider events.
#[derive(Clone)]
pub struct WebhookDispatcher {
    reconciler: Arc<OrderReconciler>,
    orders: Arc<OrderService>,
    event_sender: Arc<EventSender>,
    secret: Option<String>,
    tolerance: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        reconciler: Arc<OrderReconciler>,
        orders: Arc<OrderService>,
        event_sender: Arc<EventSender>,
        secret: Option<String>,
        tolerance: Duration,
    ) -> Self {
        Self {
            reconciler,
            orders,
            event_sender,
            secret,
            tolerance,
        }
    }

    /// Checks the signature header against the raw body.
    pub fn verify(&self, signature_header: Option<&str>, body: &[u8]) -> Result<(), ServiceError> {
        signature::verify(
            self.secret.as_deref(),
            signature_header,
            body,
            self.tolerance,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| {
            warn!(error = %e, "webhook signature rejected");
            counter!("checkout_webhook_rejected_total", 1);
            ServiceError::from(e)
        })
    }

    /// Verifies then dispatches. Only a signature failure is an error.
    pub async fn handle(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<DispatchOutcome, ServiceError> {
        self.verify(signature_header, body)?;
        Ok(self.dispatch(body).await)
    }

    async fn dispatch(&self, body: &[u8]) -> DispatchOutcome {
        let event: WebhookEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "verified webhook payload could not be parsed");
                return DispatchOutcome::Unparseable;
            }
        };

        counter!("checkout_webhook_events_total", 1, "type" => event.event_type.clone());

        match event.event_type.as_str() {
            PAYMENT_INTENT_SUCCEEDED => self.on_payment_succeeded(&event).await,
            PAYMENT_INTENT_FAILED => self.on_payment_failed(&event).await,
            CHARGE_REFUNDED => self.on_charge_refunded(&event).await,
            other => {
                info!(event_id = ?event.id, event_type = other, "ignoring webhook event");
                DispatchOutcome::Ignored
            }
        }
    }

    #[instrument(skip(self, event), fields(event_id = ?event.id, event_type = %event.event_type))]
    async fn on_payment_succeeded(&self, event: &WebhookEvent) -> DispatchOutcome {
        let object = &event.data.object;
        let Some(intent_id) = object.get("id").and_then(Value::as_str) else {
            warn!("payment_intent.succeeded without an intent id");
            return DispatchOutcome::Unparseable;
        };

        let owner = object
            .get("metadata")
            .and_then(|m| m.get(metadata::USER_ID))
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok());

        let Some(user_id) = owner else {
            warn!(payment_intent_id = intent_id, "intent metadata has no usable user_id");
            return DispatchOutcome::MissingOwner;
        };

        match self.reconciler.reconcile(intent_id, user_id, None).await {
            Ok(outcome) if outcome.was_created() => DispatchOutcome::OrderCreated,
            Ok(_) => DispatchOutcome::OrderAlreadyExisted,
            Err(e) => {
                error!(
                    payment_intent_id = intent_id,
                    %user_id,
                    error = %e,
                    code = e.code(),
                    "webhook reconcile failed"
                );
                DispatchOutcome::ReconcileFailed
            }
        }
    }

    #[instrument(skip(self, event), fields(event_id = ?event.id, event_type = %event.event_type))]
    async fn on_payment_failed(&self, event: &WebhookEvent) -> DispatchOutcome {
        let object = &event.data.object;
        let intent_id = object
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let reason = object
            .pointer("/last_payment_error/message")
            .and_then(Value::as_str)
            .map(str::to_string);

        warn!(payment_intent_id = %intent_id, reason = ?reason, "payment failed");
        self.event_sender
            .send_or_log(Event::PaymentFailed {
                payment_intent_id: intent_id,
                reason,
            })
            .await;
        DispatchOutcome::PaymentFailureRecorded
    }

    #[instrument(skip(self, event), fields(event_id = ?event.id, event_type = %event.event_type))]
    async fn on_charge_refunded(&self, event: &WebhookEvent) -> DispatchOutcome {
        let Some(intent_id) = event
            .data
            .object
            .get("payment_intent")
            .and_then(Value::as_str)
        else {
            warn!("charge.refunded without a payment_intent");
            return DispatchOutcome::RefundWithoutOrder;
        };

        match self.orders.mark_refunded(intent_id).await {
            Ok(Some(_)) => DispatchOutcome::Refunded,
            Ok(None) => {
                info!(payment_intent_id = intent_id, "refund for unknown order");
                DispatchOutcome::RefundWithoutOrder
            }
            Err(e) => {
                error!(payment_intent_id = intent_id, error = %e, "refund update failed");
                DispatchOutcome::RefundFailed
            }
        }
    }
}
