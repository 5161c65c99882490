use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::payments::{metadata, CreateIntentParams, PaymentGateway};
use crate::services::{carts, pricing, shipping};

/// What the client needs to confirm payment, plus the priced breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    /// Grand total charged
    #[schema(value_type = f64)]
    pub amount: Decimal,
    #[schema(value_type = f64)]
    pub subtotal: Decimal,
    #[schema(value_type = f64)]
    pub tax_amount: Decimal,
    #[schema(value_type = f64)]
    pub shipping_amount: Decimal,
}

/// Starts payment for the caller's cart.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db,
            gateway,
            currency: currency.into(),
        }
    }

    /// Prices the cart and opens a provider intent for it. Mutates nothing locally.
    #[instrument(skip(self, user, raw_shipping), fields(user_id = %user.user_id))]
    pub async fn create_intent(
        &self,
        user: &AuthUser,
        raw_shipping: Option<&serde_json::Value>,
    ) -> Result<CreateIntentResponse, ServiceError> {
        user.require_verified()?;

        let address = shipping::normalize_and_validate(raw_shipping)?;

        let cart = carts::find_cart_with_items(&*self.db, user.user_id)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(ServiceError::EmptyCart)?;

        let breakdown = pricing::price(cart.cart.subtotal);

        let shipping_json = serde_json::to_string(&address)
            .map_err(|e| ServiceError::InternalError(format!("shipping serialization: {}", e)))?;

        let mut meta = HashMap::new();
        meta.insert(metadata::USER_ID.to_string(), user.user_id.to_string());
        meta.insert(metadata::CART_ID.to_string(), cart.cart.id.to_string());
        meta.insert(metadata::SHIPPING_INFO.to_string(), shipping_json);

        let intent = self
            .gateway
            .create_intent(CreateIntentParams {
                amount: pricing::to_minor_units(breakdown.total),
                currency: self.currency.clone(),
                metadata: meta,
            })
            .await?;

        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            ServiceError::PaymentProvider(format!(
                "payment intent {} has no client secret",
                intent.id
            ))
        })?;

        info!(
            payment_intent_id = %intent.id,
            cart_id = %cart.cart.id,
            total = %breakdown.total,
            "payment intent created"
        );

        Ok(CreateIntentResponse {
            client_secret,
            payment_intent_id: intent.id,
            amount: breakdown.total,
            subtotal: breakdown.subtotal,
            tax_amount: breakdown.tax,
            shipping_amount: breakdown.shipping,
        })
    }
}
