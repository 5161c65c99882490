//! HTTP payment gateway against a mock provider.

use std::collections::HashMap;
use std::time::Duration;

use assert_matches::assert_matches;
use checkout_core::payments::{
    CreateIntentParams, IntentStatus, PaymentGateway, PaymentGatewayError, StripeConfig,
    StripeGateway,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer, timeout: Duration) -> StripeGateway {
    StripeGateway::new(StripeConfig {
        api_base: server.uri(),
        secret_key: "sk_test_123".to_string(),
        request_timeout: timeout,
    })
    .unwrap()
}

fn intent_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "object": "payment_intent",
        "amount": 9898,
        "currency": "usd",
        "status": status,
        "client_secret": format!("{}_secret_x", id),
        "metadata": { "user_id": "6f1c1a52-2f67-4b4c-a1b9-0a4f5a0c2d11" },
        "livemode": false
    })
}

#[tokio::test]
async fn create_intent_posts_form_with_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("amount=9898"))
        .and(body_string_contains("currency=usd"))
        .and(body_string_contains("metadata%5Buser_id%5D="))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(intent_json("pi_new", "requires_payment_method")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let intent = gateway(&server, Duration::from_secs(5))
        .create_intent(CreateIntentParams {
            amount: 9898,
            currency: "USD".to_string(),
            metadata: HashMap::from([(
                "user_id".to_string(),
                "6f1c1a52-2f67-4b4c-a1b9-0a4f5a0c2d11".to_string(),
            )]),
        })
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_new");
    assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
    assert_eq!(intent.client_secret.as_deref(), Some("pi_new_secret_x"));
    assert!(intent.metadata_user_id().is_some());
}

#[tokio::test]
async fn retrieve_parses_status_and_tolerates_unknown_values() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_done"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_json("pi_done", "succeeded")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_future"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(intent_json("pi_future", "some_new_state")),
        )
        .mount(&server)
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    let done = gw.retrieve_intent("pi_done").await.unwrap();
    assert!(done.status.is_settled());
    assert_eq!(done.amount, 9898);

    let future = gw.retrieve_intent("pi_future").await.unwrap();
    assert_eq!(future.status, IntentStatus::Unknown);
    assert!(!future.status.is_settled());
}

#[tokio::test]
async fn missing_intent_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": "resource_missing",
                "message": "No such payment_intent: 'pi_gone'",
                "type": "invalid_request_error"
            }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(5))
        .retrieve_intent("pi_gone")
        .await
        .unwrap_err();
    assert_matches!(err, PaymentGatewayError::NotFound(ref id) if id == "pi_gone");
}

#[tokio::test]
async fn path_like_references_never_reach_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ch_paid",
            "object": "charge",
            "amount": 9898,
            "currency": "usd",
            "status": "succeeded",
            "metadata": {}
        })))
        .expect(0)
        .mount(&server)
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    for reference in ["../charges/ch_paid", "pi_1/../../charges/ch_paid", "pi_1?expand=x"] {
        let err = gw.retrieve_intent(reference).await.unwrap_err();
        assert_matches!(err, PaymentGatewayError::NotFound(ref id) if id == reference);
    }
}

#[tokio::test]
async fn provider_errors_carry_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Invalid API Key provided", "type": "invalid_request_error" }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(5))
        .create_intent(CreateIntentParams {
            amount: 100,
            currency: "usd".to_string(),
            metadata: HashMap::new(),
        })
        .await
        .unwrap_err();
    assert_matches!(
        err,
        PaymentGatewayError::Api { status: 401, ref message } if message.contains("Invalid API Key")
    );
}

#[tokio::test]
async fn slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(intent_json("pi_slow", "succeeded"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_millis(200))
        .retrieve_intent("pi_slow")
        .await
        .unwrap_err();
    assert_matches!(err, PaymentGatewayError::Timeout);
}
