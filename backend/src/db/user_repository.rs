use async_trait::async_trait;
use uuid::Uuid;

use crate::models::user::BillingUser;

/// Identity lookups the billing code depends on. The users table itself belongs to the
/// identity service; only the Stripe customer id is written from here.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<BillingUser>, sqlx::Error>;

    async fn find_user_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<BillingUser>, sqlx::Error>;

    async fn set_user_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error>;
}
