// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper, checkout and
// billing). Webhook signatures are checked by `signature` rather than the crate's
// `webhook-events` feature so event payloads stay raw JSON regardless of the account's API
// version. Touching APIs outside those features will require updating backend/Cargo.toml.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod signature;

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for StripeServiceError {
    fn from(err: stripe::StripeError) -> Self {
        StripeServiceError::Api(err.to_string())
    }
}

impl From<signature::SignatureError> for StripeServiceError {
    fn from(err: signature::SignatureError) -> Self {
        StripeServiceError::Webhook(err.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub trial_period_days: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub price_id: String,
    pub client_reference_id: Option<String>,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    /// Unix timestamp (seconds); carries an unfinished trial over instead of granting a new one
    pub trial_end: Option<i64>,
    pub metadata: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionInfo {
    pub id: String,
    pub status: String,
    /// Unix timestamps (seconds)
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[async_trait]
pub trait StripeService: Send + Sync {
    async fn create_customer(&self, email: &str) -> Result<String, StripeServiceError>;

    async fn create_subscription(
        &self,
        req: CreateSubscriptionRequest,
    ) -> Result<SubscriptionInfo, StripeServiceError>;

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError>;

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError>;
}

/// Reads `id` and `type` off a verified payload.
pub(crate) fn parse_event(payload: &[u8]) -> Result<StripeEvent, StripeServiceError> {
    let val: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
    let id = val
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| StripeServiceError::Serde("event is missing an id".into()))?
        .to_string();
    let ty = val
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| StripeServiceError::Serde("event is missing a type".into()))?
        .to_string();
    Ok(StripeEvent {
        id,
        r#type: ty,
        payload: val,
    })
}

mod live;
mod mock;

pub use live::LiveStripeService;
pub use mock::MockStripeService;
