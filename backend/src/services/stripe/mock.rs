use super::{
    parse_event, CheckoutSession, CreateCheckoutSessionRequest, CreateSubscriptionRequest,
    StripeEvent, StripeService, StripeServiceError, SubscriptionInfo,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DAY_SECS: i64 = 86_400;

/// In-memory stand-in used by tests and local runs without Stripe credentials.
/// Webhook payloads are accepted without checking the signature (the header must still be
/// non-empty).
#[derive(Clone)]
pub struct MockStripeService {
    pub subscription_status: Arc<Mutex<String>>,
    pub created_customers: Arc<Mutex<Vec<String>>>,
    pub created_subscriptions: Arc<Mutex<Vec<CreateSubscriptionRequest>>>,
    pub canceled_subscriptions: Arc<Mutex<Vec<String>>>,
    pub last_checkout_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub fail_with: Arc<Mutex<Option<String>>>,
    pub delay: Arc<Mutex<Option<Duration>>>,
}

impl Default for MockStripeService {
    fn default() -> Self {
        Self {
            subscription_status: Arc::new(Mutex::new("trialing".into())),
            created_customers: Arc::default(),
            created_subscriptions: Arc::default(),
            canceled_subscriptions: Arc::default(),
            last_checkout_requests: Arc::default(),
            fail_with: Arc::default(),
            delay: Arc::default(),
        }
    }
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, message: &str) -> Self {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    async fn simulate_call(&self) -> Result<(), StripeServiceError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.fail_with.lock().unwrap().clone() {
            Some(msg) => Err(StripeServiceError::Api(msg)),
            None => Ok(()),
        }
    }
}

static SEQ: AtomicU64 = AtomicU64::new(0);

fn make_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}_{}_{}", prefix, ts, SEQ.fetch_add(1, Ordering::Relaxed))
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_customer(&self, email: &str) -> Result<String, StripeServiceError> {
        self.simulate_call().await?;
        self.created_customers
            .lock()
            .unwrap()
            .push(email.to_string());
        Ok(make_id("cus_test"))
    }

    async fn create_subscription(
        &self,
        req: CreateSubscriptionRequest,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        self.simulate_call().await?;
        let now = now_unix();
        let trial_end = now + i64::from(req.trial_period_days) * DAY_SECS;
        let status = self.subscription_status.lock().unwrap().clone();
        self.created_subscriptions.lock().unwrap().push(req);
        Ok(SubscriptionInfo {
            id: make_id("sub_test"),
            status,
            trial_start: Some(now),
            trial_end: Some(trial_end),
            current_period_start: Some(now),
            current_period_end: Some(trial_end),
        })
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        self.simulate_call().await?;
        self.canceled_subscriptions
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        Ok(SubscriptionInfo {
            id: subscription_id.to_string(),
            status: "canceled".into(),
            trial_start: None,
            trial_end: None,
            current_period_start: None,
            current_period_end: None,
        })
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.simulate_call().await?;
        self.last_checkout_requests.lock().unwrap().push(req);
        Ok(CheckoutSession {
            id: make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if signature_header.trim().is_empty() {
            return Err(StripeServiceError::Webhook("missing signature".into()));
        }
        parse_event(payload)
    }
}
