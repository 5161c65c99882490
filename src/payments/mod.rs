//! Outbound payment provider access.
//!
//! The order pipeline only ever needs two operations from the provider:
//! creating a payment intent for a priced cart and reading an intent back to
//! learn whether money actually moved. Everything else about the provider
//! stays behind [`PaymentGateway`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod stripe;

pub use stripe::{StripeConfig, StripeGateway};

/// Metadata keys attached to every intent we create.
pub mod metadata {
    pub const USER_ID: &str = "user_id";
    pub const CART_ID: &str = "cart_id";
    /// JSON-serialized normalized shipping info
    pub const SHIPPING_INFO: &str = "shipping_info";
}

/// Provider object ids are `[A-Za-z0-9_]+`; anything else cannot name an intent.
pub fn is_well_formed_intent_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 255
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Provider-side lifecycle of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Unknown => "unknown",
        }
    }

    /// Only a succeeded intent means funds were captured.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment intent as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Amount in minor units
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    pub fn metadata_user_id(&self) -> Option<Uuid> {
        self.metadata
            .get(metadata::USER_ID)
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    }

    pub fn metadata_cart_id(&self) -> Option<Uuid> {
        self.metadata
            .get(metadata::CART_ID)
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    }

    /// Shipping info captured at intent creation, if it parses as JSON.
    pub fn metadata_shipping_info(&self) -> Option<serde_json::Value> {
        self.metadata
            .get(metadata::SHIPPING_INFO)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Parameters for creating an intent.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIntentParams {
    /// Amount in minor units
    pub amount: i64,
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("payment provider request timed out")]
    Timeout,

    #[error("payment intent {0} not found")]
    NotFound(String),

    #[error("payment provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("payment provider unreachable: {0}")]
    Transport(String),

    #[error("unexpected payment provider response: {0}")]
    Decode(String),

    #[error("payment provider not configured: {0}")]
    Configuration(String),
}

/// The external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        params: CreateIntentParams,
    ) -> Result<PaymentIntent, PaymentGatewayError>;

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, PaymentGatewayError>;
}

/// Retrieves an intent, giving up after `limit`.
pub async fn retrieve_intent_within(
    gateway: &dyn PaymentGateway,
    id: &str,
    limit: Duration,
) -> Result<PaymentIntent, PaymentGatewayError> {
    tokio::time::timeout(limit, gateway.retrieve_intent(id))
        .await
        .map_err(|_| PaymentGatewayError::Timeout)?
}
