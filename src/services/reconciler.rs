//! Payment intent to order reconciliation.
//!
//! Both the client's confirmation call and the provider webhook land here.
//! Whichever arrives first creates the order; every later call for the same
//! intent gets that order back. The unique index on
//! `orders.payment_intent_id` is the final arbiter when two calls race.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    error::SqlErr, ActiveModelTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    IsolationLevel, Set, TransactionTrait,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, payment_status, OrderStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{self, PaymentGateway, PaymentIntent};
use crate::services::carts::{self, CartWithItems};
use crate::services::orders::{self, OrderResponse};
use crate::services::pricing;
use crate::services::shipping::{self, ShippingAddress};

/// Attempts made when the store reports a serialization conflict.
pub const MAX_ATTEMPTS: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created(OrderResponse),
    AlreadyExists(OrderResponse),
}

impl ReconcileOutcome {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn order(&self) -> &OrderResponse {
        match self {
            Self::Created(order) | Self::AlreadyExists(order) => order,
        }
    }

    pub fn into_order(self) -> OrderResponse {
        match self {
            Self::Created(order) | Self::AlreadyExists(order) => order,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::AlreadyExists(_) => "already_exists",
        }
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn is_serialization_conflict(err: &DbErr) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("could not serialize")
        || message.contains("deadlock detected")
        || message.contains("database is locked")
        || message.contains("database table is locked")
}

/// Maps store contention onto `TransactionConflict`; leaves other errors alone.
fn classify(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::DatabaseError(db_err) if is_serialization_conflict(&db_err) => {
            ServiceError::TransactionConflict(db_err.to_string())
        }
        other => other,
    }
}

/// Creates exactly one order per settled payment intent.
#[derive(Clone)]
pub struct OrderReconciler {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    provider_timeout: Duration,
}

impl OrderReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            provider_timeout,
        }
    }

    /// Reconciles `payment_intent_id` into an order owned by `user_id`.
    ///
    /// `explicit_shipping` takes precedence over the shipping captured on the
    /// intent when it normalizes to anything at all.
    #[instrument(skip(self, explicit_shipping), fields(payment_intent_id = %payment_intent_id, user_id = %user_id))]
    pub async fn reconcile(
        &self,
        payment_intent_id: &str,
        user_id: Uuid,
        explicit_shipping: Option<&Value>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let mut attempt = 1;
        loop {
            let result = self
                .reconcile_once(payment_intent_id, user_id, explicit_shipping)
                .await
                .map_err(classify);

            match result {
                Err(ServiceError::TransactionConflict(reason)) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, %reason, "reconcile transaction conflicted, retrying");
                    counter!("checkout_reconcile_retries_total", 1);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Ok(outcome) => {
                    counter!("checkout_reconcile_total", 1, "outcome" => outcome.label());
                    if outcome.was_created() {
                        self.announce(&outcome).await;
                    }
                    return Ok(outcome);
                }
                Err(err) => {
                    if let ServiceError::TransactionConflict(reason) = &err {
                        warn!(attempt, %reason, "reconcile gave up after repeated conflicts");
                    }
                    counter!("checkout_reconcile_total", 1, "outcome" => err.code());
                    return Err(err);
                }
            }
        }
    }

    async fn announce(&self, outcome: &ReconcileOutcome) {
        let order = outcome.order();
        counter!("checkout_orders_created_total", 1);
        info!(
            order_id = %order.id,
            total = %order.total_amount,
            "order created from payment intent"
        );
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                user_id: order.user_id,
                payment_intent_id: order.payment_intent_id.clone(),
                total: order.total_amount,
            })
            .await;
    }

    async fn reconcile_once(
        &self,
        payment_intent_id: &str,
        user_id: Uuid,
        explicit_shipping: Option<&Value>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let txn = self
            .db
            .begin_with_config(Some(IsolationLevel::Serializable), None)
            .await?;

        match self
            .reconcile_in(&txn, payment_intent_id, user_id, explicit_shipping)
            .await
        {
            Ok(outcome) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }

                match err {
                    ServiceError::DatabaseError(db_err) if is_unique_violation(&db_err) => {
                        self.existing_after_race(payment_intent_id).await
                    }
                    other => Err(other),
                }
            }
        }
    }

    /// A concurrent call committed first; return its order.
    async fn existing_after_race(
        &self,
        payment_intent_id: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let db = &*self.db;
        match orders::find_by_payment_intent(db, payment_intent_id).await? {
            Some(order) => {
                info!("lost order insert race; returning committed order");
                let response = orders::load_order_response(db, order).await?;
                Ok(ReconcileOutcome::AlreadyExists(response))
            }
            None => Err(ServiceError::TransactionConflict(format!(
                "order for {} was neither inserted nor found",
                payment_intent_id
            ))),
        }
    }

    async fn reconcile_in(
        &self,
        txn: &DatabaseTransaction,
        payment_intent_id: &str,
        user_id: Uuid,
        explicit_shipping: Option<&Value>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let intent = payments::retrieve_intent_within(
            self.gateway.as_ref(),
            payment_intent_id,
            self.provider_timeout,
        )
        .await?;

        // Orders are keyed on the caller's reference; the provider object must be that intent.
        if intent.id != payment_intent_id {
            warn!(
                provider_id = %intent.id,
                "provider returned a different object for this reference"
            );
            return Err(ServiceError::BadRequest(
                "payment reference does not identify a payment intent".to_string(),
            ));
        }

        if !intent.status.is_settled() {
            return Err(ServiceError::PaymentNotComplete(intent.status.to_string()));
        }

        if let Some(owner) = intent.metadata_user_id() {
            if owner != user_id {
                warn!(%owner, "payment intent belongs to another user");
                return Err(ServiceError::Forbidden(
                    "payment intent belongs to another customer".to_string(),
                ));
            }
        }

        if let Some(existing) = orders::find_by_payment_intent(txn, payment_intent_id).await? {
            let response = orders::load_order_response(txn, existing).await?;
            return Ok(ReconcileOutcome::AlreadyExists(response));
        }

        let cart = carts::find_cart_with_items(txn, user_id)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or(ServiceError::CartEmpty)?;

        if let Some(intent_cart) = intent.metadata_cart_id() {
            if intent_cart != cart.cart.id {
                warn!(
                    %intent_cart,
                    cart_id = %cart.cart.id,
                    "cart was replaced after the payment intent was created"
                );
            }
        }

        let address = resolve_shipping(explicit_shipping, &intent)?;
        let breakdown = pricing::price(cart.cart.subtotal);

        let expected_minor = pricing::to_minor_units(breakdown.total);
        if expected_minor != intent.amount {
            warn!(
                authorized = intent.amount,
                computed = expected_minor,
                "authorized amount differs from recomputed cart total"
            );
        }

        let response =
            insert_order(txn, &intent, user_id, &cart, &address, &breakdown).await?;
        carts::delete_cart(txn, cart.cart.id).await?;

        Ok(ReconcileOutcome::Created(response))
    }
}

fn resolve_shipping(
    explicit: Option<&Value>,
    intent: &PaymentIntent,
) -> Result<ShippingAddress, ServiceError> {
    let normalized = shipping::normalize(explicit)
        .filter(|info| !info.is_empty())
        .or_else(|| {
            intent
                .metadata_shipping_info()
                .and_then(|stored| shipping::normalize(Some(&stored)))
                .filter(|info| !info.is_empty())
        })
        .ok_or(ServiceError::MissingShipping)?;

    Ok(shipping::validate(&normalized)?)
}

async fn insert_order(
    txn: &DatabaseTransaction,
    intent: &PaymentIntent,
    user_id: Uuid,
    cart: &CartWithItems,
    address: &ShippingAddress,
    breakdown: &pricing::PriceBreakdown,
) -> Result<OrderResponse, ServiceError> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();

    let shipping_json = serde_json::to_value(address)
        .map_err(|e| ServiceError::InternalError(format!("shipping serialization: {}", e)))?;

    let order = order::ActiveModel {
        id: Set(order_id),
        user_id: Set(user_id),
        payment_intent_id: Set(intent.id.clone()),
        payment_status: Set(payment_status::PAID.to_string()),
        status: Set(OrderStatus::Processing),
        shipping_address: Set(shipping_json),
        items_subtotal: Set(breakdown.subtotal),
        tax_amount: Set(breakdown.tax),
        shipping_amount: Set(breakdown.shipping),
        total_amount: Set(breakdown.total),
        currency: Set(intent.currency.to_lowercase()),
        paid_at: Set(Some(now)),
        refunded_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await?;

    let mut items = Vec::with_capacity(cart.items.len());
    for line in &cart.items {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            name: Set(line.name.clone()),
            size: Set(line.size.clone()),
            image: Set(line.image.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            line_total: Set(line.line_total),
            position: Set(line.position),
        }
        .insert(txn)
        .await?;
        items.push(item);
    }

    Ok(orders::OrderResponse::from_parts(order, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{CreateIntentParams, IntentStatus, PaymentGatewayError};
    use crate::services::carts::fixtures;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use sea_orm::{ConnectOptions, Database, RuntimeErr};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    struct OfflineGateway;

    #[async_trait]
    impl PaymentGateway for OfflineGateway {
        async fn create_intent(
            &self,
            _params: CreateIntentParams,
        ) -> Result<PaymentIntent, PaymentGatewayError> {
            Err(PaymentGatewayError::Transport("offline".into()))
        }

        async fn retrieve_intent(&self, _id: &str) -> Result<PaymentIntent, PaymentGatewayError> {
            Err(PaymentGatewayError::Transport("offline".into()))
        }
    }

    async fn reconciler() -> OrderReconciler {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();
        crate::db::run_migrations(&db).await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        OrderReconciler::new(
            Arc::new(db),
            Arc::new(OfflineGateway),
            Arc::new(EventSender::new(tx)),
            Duration::from_secs(1),
        )
    }

    fn settled(id: &str, user_id: Uuid) -> PaymentIntent {
        PaymentIntent {
            id: id.to_string(),
            amount: 9898,
            currency: "usd".into(),
            status: IntentStatus::Succeeded,
            client_secret: None,
            metadata: HashMap::from([(
                payments::metadata::USER_ID.to_string(),
                user_id.to_string(),
            )]),
        }
    }

    async fn place(
        reconciler: &OrderReconciler,
        intent: &PaymentIntent,
        user_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*reconciler.db;
        let cart = carts::find_cart_with_items(db, user_id).await?.unwrap();
        let address = shipping::normalize_and_validate(Some(&serde_json::json!({
            "address": "1 Main St",
            "city": "Austin",
            "state": "TX",
            "postalCode": "73301",
            "country": "US"
        })))?;
        let breakdown = pricing::price(cart.cart.subtotal);

        let txn = db.begin().await?;
        match insert_order(&txn, intent, user_id, &cart, &address, &breakdown).await {
            Ok(order) => {
                txn.commit().await?;
                Ok(order)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    #[tokio::test]
    async fn losing_the_insert_race_returns_the_committed_order() {
        let reconciler = reconciler().await;
        let user = Uuid::new_v4();
        fixtures::seed_cart(&*reconciler.db, user, &[("Hoodie", dec!(60.00))]).await;
        let intent = settled("pi_raced", user);

        let winner = place(&reconciler, &intent, user).await.unwrap();

        match place(&reconciler, &intent, user).await {
            Err(ServiceError::DatabaseError(err)) => assert!(is_unique_violation(&err)),
            other => panic!("expected a unique violation, got {other:?}"),
        }

        match reconciler.existing_after_race("pi_raced").await.unwrap() {
            ReconcileOutcome::AlreadyExists(order) => {
                assert_eq!(order.id, winner.id);
                assert_eq!(order.items.len(), 1);
            }
            other => panic!("expected the committed order, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn vanished_race_winner_is_a_conflict() {
        let reconciler = reconciler().await;
        assert!(matches!(
            reconciler.existing_after_race("pi_nobody").await,
            Err(ServiceError::TransactionConflict(_))
        ));
    }

    #[test]
    fn lock_errors_become_conflicts() {
        let err = ServiceError::DatabaseError(DbErr::Exec(RuntimeErr::Internal(
            "database is locked".into(),
        )));
        assert!(matches!(
            classify(err),
            ServiceError::TransactionConflict(_)
        ));
    }

    #[test]
    fn other_errors_pass_through() {
        let err = ServiceError::DatabaseError(DbErr::Custom("no such table: order_items".into()));
        assert!(matches!(classify(err), ServiceError::DatabaseError(_)));
        assert!(matches!(
            classify(ServiceError::CartEmpty),
            ServiceError::CartEmpty
        ));
    }
}
