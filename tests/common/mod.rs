#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use checkout_core::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{cart, cart_item, order},
    events::{Event, EventSender},
    handlers::AppServices,
    payments::{
        metadata, CreateIntentParams, IntentStatus, PaymentGateway, PaymentGatewayError,
        PaymentIntent,
    },
    services::carts,
    webhooks::{signature, SIGNATURE_HEADER},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_test_secret";
const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// In-process stand-in for the payment provider.
#[derive(Default)]
pub struct FakePaymentGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    created: AtomicUsize,
    retrievals: AtomicUsize,
    retrieve_delay: Mutex<Option<Duration>>,
}

impl FakePaymentGateway {
    /// Registers an intent as the provider would report it.
    pub fn put_intent(&self, intent: PaymentIntent) {
        self.intents
            .lock()
            .unwrap()
            .insert(intent.id.clone(), intent);
    }

    /// Answers lookups for `reference` with `intent`, whatever its own id says.
    pub fn alias(&self, reference: &str, intent: PaymentIntent) {
        self.intents
            .lock()
            .unwrap()
            .insert(reference.to_string(), intent);
    }

    pub fn set_status(&self, id: &str, status: IntentStatus) {
        if let Some(intent) = self.intents.lock().unwrap().get_mut(id) {
            intent.status = status;
        }
    }

    pub fn set_retrieve_delay(&self, delay: Duration) {
        *self.retrieve_delay.lock().unwrap() = Some(delay);
    }

    pub fn intent(&self, id: &str) -> Option<PaymentIntent> {
        self.intents.lock().unwrap().get(id).cloned()
    }

    pub fn retrievals(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn create_intent(
        &self,
        params: CreateIntentParams,
    ) -> Result<PaymentIntent, PaymentGatewayError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("pi_fake_{}", n);
        let intent = PaymentIntent {
            id: id.clone(),
            amount: params.amount,
            currency: params.currency,
            status: IntentStatus::RequiresPaymentMethod,
            client_secret: Some(format!("{}_secret_{}", id, n)),
            metadata: params.metadata,
        };
        self.put_intent(intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, PaymentGatewayError> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        let delay = *self.retrieve_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.intent(id)
            .ok_or_else(|| PaymentGatewayError::NotFound(id.to_string()))
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakePaymentGateway>,
    auth_service: Arc<AuthService>,
    events: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    _db_dir: Option<tempfile::TempDir>,
}

/// A line to seed into a cart.
#[derive(Debug, Clone)]
pub struct NewCartLine {
    pub product_id: Uuid,
    pub name: String,
    pub size: Option<String>,
    pub image: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(tweak, None).await
    }

    /// Backed by a SQLite file so `connections` requests can hold transactions at once.
    pub async fn with_file_db(connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("checkout.db").display()
        );
        Self::build(
            move |cfg| {
                cfg.database_url = url;
                cfg.db_max_connections = connections;
            },
            Some(dir),
        )
        .await
    }

    async fn build(
        tweak: impl FnOnce(&mut AppConfig),
        db_dir: Option<tempfile::TempDir>,
    ) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.payment_request_timeout_secs = 5;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));

        let gateway = Arc::new(FakePaymentGateway::default());
        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));

        let services = AppServices::new(db_arc.clone(), gateway.clone(), event_sender, &cfg);

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            auth: auth_service.clone(),
            services,
        };

        Self {
            router: checkout_core::app_router(state.clone()),
            state,
            gateway,
            auth_service,
            events: tokio::sync::Mutex::new(event_rx),
            _db_dir: db_dir,
        }
    }

    /// Bearer token for a storefront user.
    pub fn token_for(&self, user_id: Uuid, verified: bool, roles: &[&str]) -> String {
        self.auth_service
            .issue_token(
                user_id,
                Some(format!("{}@example.com", user_id.simple())),
                verified,
                roles.iter().map(|r| r.to_string()).collect(),
            )
            .expect("issue test token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw webhook body with the given signature header.
    pub async fn post_webhook(&self, body: &str, signature_header: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature_header {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("failed to build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    /// Posts a webhook signed with the configured secret at the current time.
    pub async fn post_signed_webhook(&self, body: &str) -> Response {
        let header = sign_now(body);
        self.post_webhook(body, Some(&header)).await
    }

    pub async fn confirm_order(&self, token: &str, payment_intent_id: &str) -> Response {
        self.request(
            Method::POST,
            "/api/v1/payments/confirm-order",
            Some(json!({ "paymentIntentId": payment_intent_id })),
            Some(token),
        )
        .await
    }

    /// Hoodie $60.00 + Cap $32.50: subtotal $92.50.
    pub async fn seed_standard_cart(&self, user_id: Uuid) {
        self.seed_cart(
            user_id,
            vec![
                line("Hoodie", Some("M"), 1, Decimal::new(6000, 2)),
                line("Cap", None, 1, Decimal::new(3250, 2)),
            ],
        )
        .await;
    }

    /// Replaces the user's cart with `lines`.
    pub async fn seed_cart(&self, user_id: Uuid, lines: Vec<NewCartLine>) {
        let db = &*self.state.db;
        let existing = carts::find_cart_with_items(db, user_id)
            .await
            .expect("load cart");
        if let Some(existing) = existing {
            carts::delete_cart(db, existing.cart.id)
                .await
                .expect("clear cart");
        }

        let now = chrono::Utc::now();
        let cart_id = Uuid::new_v4();
        let subtotal: Decimal = lines
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();
        cart::ActiveModel {
            id: Set(cart_id),
            customer_id: Set(user_id),
            subtotal: Set(subtotal),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed cart");

        for (position, line) in lines.into_iter().enumerate() {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                product_id: Set(line.product_id),
                name: Set(line.name),
                size: Set(line.size),
                image: Set(line.image),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.unit_price * Decimal::from(line.quantity)),
                position: Set(position as i32),
                created_at: Set(now),
            }
            .insert(db)
            .await
            .expect("seed cart item");
        }
    }

    pub async fn cart_item_count(&self, user_id: Uuid) -> usize {
        carts::find_cart_with_items(&*self.state.db, user_id)
            .await
            .expect("load cart")
            .map(|cart| cart.items.len())
            .unwrap_or(0)
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    /// Registers a settled intent owned by `user_id` with shipping captured in metadata.
    pub fn settled_intent(&self, id: &str, user_id: Uuid, amount: i64) -> PaymentIntent {
        let intent = PaymentIntent {
            id: id.to_string(),
            amount,
            currency: "usd".to_string(),
            status: IntentStatus::Succeeded,
            client_secret: Some(format!("{}_secret", id)),
            metadata: HashMap::from([
                (metadata::USER_ID.to_string(), user_id.to_string()),
                (
                    metadata::SHIPPING_INFO.to_string(),
                    shipping_address().to_string(),
                ),
            ]),
        };
        self.gateway.put_intent(intent.clone());
        intent
    }

    /// Events emitted so far, oldest first.
    pub async fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().await;
        let mut drained = Vec::new();
        while let Ok(event) = rx.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn line(name: &str, size: Option<&str>, quantity: i32, unit_price: Decimal) -> NewCartLine {
    NewCartLine {
        product_id: Uuid::new_v4(),
        name: name.to_string(),
        size: size.map(str::to_string),
        image: Some(format!("https://cdn.example.com/{}.png", name.to_lowercase())),
        quantity,
        unit_price,
    }
}

pub fn shipping_address() -> Value {
    json!({
        "address": "1 Main St",
        "city": "Austin",
        "state": "TX",
        "postalCode": "73301",
        "country": "US",
        "phone": "555-0100",
        "name": "Pat Doe"
    })
}

pub fn sign_now(body: &str) -> String {
    signature::sign(
        WEBHOOK_SECRET,
        chrono::Utc::now().timestamp(),
        body.as_bytes(),
    )
    .expect("sign webhook body")
}

pub fn event_body(event_type: &str, object: Value) -> String {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": object }
    })
    .to_string()
}

pub async fn response_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Reads a money field serialized as a string or number, rounded to cents.
pub fn money(value: &Value) -> Decimal {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => panic!("not a money value: {other}"),
    };
    raw.parse::<Decimal>()
        .expect("decimal money value")
        .round_dp(2)
}
