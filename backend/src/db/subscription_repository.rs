use async_trait::async_trait;
use uuid::Uuid;

use crate::models::subscription::{NewSubscription, Subscription};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert_subscription(
        &self,
        new_sub: NewSubscription,
    ) -> Result<Subscription, sqlx::Error>;

    /// The authoritative row for a user: the most recently created one.
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error>;

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Persists status, trial window, billing dates and `updated_at` if the stored version still
    /// equals `sub.version`. Returns `None` when the row changed underneath the caller.
    async fn update_subscription(
        &self,
        sub: &Subscription,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Administrative cleanup only. Returns whether a row was removed.
    async fn delete_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<bool, sqlx::Error>;
}
