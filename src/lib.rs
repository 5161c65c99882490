//! Checkout core library
//!
//! Payment intent creation, idempotent order reconciliation and payment
//! webhook dispatch behind an axum router.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payments;
pub mod services;
pub mod telemetry;
pub mod webhooks;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::AuthService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    let payments = Router::new()
        .route(
            "/payments/create-intent",
            post(handlers::checkout::create_payment_intent),
        )
        .route(
            "/payments/confirm-order",
            post(handlers::checkout::confirm_order),
        )
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        );

    let orders = Router::new()
        .route("/orders/my-orders", get(handlers::orders::my_orders))
        .route("/orders/:id", get(handlers::orders::get_order));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(payments)
        .merge(orders)
}

/// Full application router: API, docs, request ids and HTTP tracing.
///
/// CORS and the request timeout are deployment concerns and layered on in
/// `main`.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(telemetry::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
