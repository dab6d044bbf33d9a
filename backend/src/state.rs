use crate::config::Config;
use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use crate::services::subscriptions::SubscriptionService;
use crate::services::webhook::WebhookDispatcher;
use crate::utils::jwt::{JwtKeyProvider, JwtKeys};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookDispatcher,
    pub stripe_event_log: Arc<dyn StripeEventLogRepository>,
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
}

impl JwtKeyProvider for AppState {
    fn jwt_keys(&self) -> &JwtKeys {
        &self.jwt_keys
    }
}
