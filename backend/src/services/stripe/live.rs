use super::{
    parse_event, signature, CheckoutSession, CreateCheckoutSessionRequest,
    CreateSubscriptionRequest, StripeEvent, StripeService, StripeServiceError, SubscriptionInfo,
};
use async_trait::async_trait;

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeService {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(settings.secret_key.clone(), settings.webhook_secret.clone())
    }
}

fn map_subscription(sub: &stripe::Subscription) -> SubscriptionInfo {
    SubscriptionInfo {
        id: sub.id.to_string(),
        status: sub.status.to_string(),
        trial_start: sub.trial_start,
        trial_end: sub.trial_end,
        current_period_start: Some(sub.current_period_start),
        current_period_end: Some(sub.current_period_end),
    }
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn create_customer(&self, email: &str) -> Result<String, StripeServiceError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = Some(email);
        let customer = stripe::Customer::create(&self.client, params).await?;
        Ok(customer.id.to_string())
    }

    async fn create_subscription(
        &self,
        req: CreateSubscriptionRequest,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        let customer = req
            .customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let mut params = stripe::CreateSubscription::new(customer);
        params.items = Some(vec![stripe::CreateSubscriptionItems {
            price: Some(req.price_id.clone()),
            ..Default::default()
        }]);
        if req.trial_period_days > 0 {
            params.trial_period_days = Some(req.trial_period_days);
        }
        let sub = stripe::Subscription::create(&self.client, params).await?;
        Ok(map_subscription(&sub))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let sub = stripe::Subscription::cancel(&self.client, &sub_id, Default::default()).await?;
        Ok(map_subscription(&sub))
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Subscription);
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            price: Some(req.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        if let Some(ref id) = req.client_reference_id {
            params.client_reference_id = Some(id);
        }
        if let Some(ref customer) = req.customer {
            let cid = customer
                .parse::<stripe::CustomerId>()
                .map_err(|e| StripeServiceError::Other(e.to_string()))?;
            params.customer = Some(cid);
        } else if let Some(ref email) = req.customer_email {
            params.customer_email = Some(email);
        }
        if let Some(trial_end) = req.trial_end {
            params.subscription_data = Some(stripe::CreateCheckoutSessionSubscriptionData {
                trial_end: Some(trial_end),
                ..Default::default()
            });
        }
        if let Some(ref meta) = req.metadata {
            params.metadata = Some(
                meta.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }

        let session = stripe::CheckoutSession::create(&self.client, params).await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if self.webhook_secret.is_empty() {
            return Err(StripeServiceError::Config(
                "webhook secret is not configured".into(),
            ));
        }
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        signature::verify(
            payload,
            signature_header,
            &self.webhook_secret,
            now,
            signature::DEFAULT_TOLERANCE_SECS,
        )?;
        parse_event(payload)
    }
}
