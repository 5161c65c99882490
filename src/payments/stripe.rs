use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::{
    is_well_formed_intent_id, CreateIntentParams, PaymentGateway, PaymentGatewayError,
    PaymentIntent,
};

/// Connection settings for a Stripe-compatible REST API
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub request_timeout: Duration,
}

impl StripeConfig {
    pub fn from_app_config(cfg: &crate::config::AppConfig) -> Result<Self, PaymentGatewayError> {
        let secret_key = cfg.payment_secret_key.clone().ok_or_else(|| {
            PaymentGatewayError::Configuration("payment_secret_key is not set".into())
        })?;

        Ok(Self {
            api_base: cfg.payment_api_base.trim_end_matches('/').to_string(),
            secret_key,
            request_timeout: cfg.payment_request_timeout(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// HTTP client for the Stripe payment intents API.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    http_client: Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentGatewayError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PaymentGatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    /// `{api_base}/v1/payment_intents/{id}` with `id` kept as one encoded segment.
    fn intent_url(&self, id: &str) -> Result<Url, PaymentGatewayError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| PaymentGatewayError::Configuration(format!("api base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| PaymentGatewayError::Configuration("api base cannot hold a path".into()))?
            .pop_if_empty()
            .extend(["v1", "payment_intents", id]);
        Ok(url)
    }

    fn transport_error(err: reqwest::Error) -> PaymentGatewayError {
        if err.is_timeout() {
            PaymentGatewayError::Timeout
        } else {
            PaymentGatewayError::Transport(err.to_string())
        }
    }

    async fn read_intent(
        response: reqwest::Response,
        intent_id: Option<&str>,
    ) -> Result<PaymentIntent, PaymentGatewayError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<PaymentIntent>()
                .await
                .map_err(|e| PaymentGatewayError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ApiErrorEnvelope>(&body).ok();
        let code = parsed.as_ref().and_then(|e| e.error.code.clone());

        if status == StatusCode::NOT_FOUND || code.as_deref() == Some("resource_missing") {
            if let Some(id) = intent_id {
                return Err(PaymentGatewayError::NotFound(id.to_string()));
            }
        }

        let message = parsed
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| body.chars().take(200).collect());

        error!(status = status.as_u16(), %message, "payment provider request failed");
        Err(PaymentGatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, params), fields(amount = params.amount, currency = %params.currency))]
    async fn create_intent(
        &self,
        params: CreateIntentParams,
    ) -> Result<PaymentIntent, PaymentGatewayError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), params.amount.to_string()),
            ("currency".into(), params.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
            (
                "automatic_payment_methods[allow_redirects]".into(),
                "never".into(),
            ),
        ];

        let mut keys: Vec<&String> = params.metadata.keys().collect();
        keys.sort();
        for key in keys {
            form.push((format!("metadata[{}]", key), params.metadata[key].clone()));
        }

        let response = self
            .http_client
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let intent = Self::read_intent(response, None).await?;

        debug!(payment_intent_id = %intent.id, "payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, PaymentGatewayError> {
        if !is_well_formed_intent_id(id) {
            warn!("refusing malformed payment intent id");
            return Err(PaymentGatewayError::NotFound(id.to_string()));
        }

        let response = self
            .http_client
            .get(self.intent_url(id)?)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::read_intent(response, Some(id)).await
    }
}
