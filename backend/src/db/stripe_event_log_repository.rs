use async_trait::async_trait;

/// Webhook event ids that have been taken for processing. Stripe delivers at least once, so
/// the dispatcher claims an id before routing the event and releases it if routing fails.
#[async_trait]
pub trait StripeEventLogRepository: Send + Sync {
    /// Atomically records `event_id`. Returns `false` when the id was already claimed.
    async fn claim_event(&self, event_id: &str) -> Result<bool, sqlx::Error>;

    async fn release_event(&self, event_id: &str) -> Result<(), sqlx::Error>;

    /// Drops ids older than `retention_days`; returns how many were removed.
    async fn purge_older_than(&self, retention_days: i32) -> Result<u64, sqlx::Error>;
}
