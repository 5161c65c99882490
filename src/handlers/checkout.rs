use axum::{extract::State, response::Response, Json};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::{checkout::CreateIntentResponse, orders::OrderResponse},
    AppState,
};

/// Body of the client-side confirmation call.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderRequest {
    #[serde(default, alias = "paymentReferenceId")]
    #[validate(length(min = 1, message = "paymentIntentId is required"))]
    pub payment_intent_id: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub shipping_info: Option<Value>,
}

/// Creates a payment intent for the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-intent",
    request_body(content = Object, description = "Shipping info, bare or wrapped as {shippingInfo: ...}"),
    responses(
        (status = 200, description = "Payment intent created", body = CreateIntentResponse),
        (status = 400, description = "Invalid shipping or empty cart", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 403, description = "Account not verified", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<Value>>,
) -> Result<Json<CreateIntentResponse>, ServiceError> {
    let body = body.map(|Json(v)| v);
    let response = state
        .services
        .checkout
        .create_intent(&user, body.as_ref())
        .await?;
    Ok(Json(response))
}

/// Turns a settled payment intent into an order
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm-order",
    request_body = ConfirmOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 200, description = "Order already existed for this payment", body = OrderResponse),
        (status = 400, description = "Payment not complete, cart empty or shipping missing", body = crate::errors::ErrorResponse),
        (status = 403, description = "Account not verified or payment owned by another customer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent update, retry", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ConfirmOrderRequest>,
) -> Result<Response, ServiceError> {
    user.require_verified()?;
    validate_input(&payload)?;

    let outcome = state
        .services
        .reconciler
        .reconcile(
            payload.payment_intent_id.trim(),
            user.user_id,
            payload.shipping_info.as_ref(),
        )
        .await?;

    if outcome.was_created() {
        info!(order_id = %outcome.order().id, "order confirmed");
        Ok(created_response(outcome.into_order()))
    } else {
        Ok(success_response(outcome.into_order()))
    }
}
