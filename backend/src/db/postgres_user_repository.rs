use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::models::user::BillingUser;

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<BillingUser>, sqlx::Error> {
        sqlx::query_as::<_, BillingUser>(
            "SELECT id, email, stripe_customer_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_user_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<BillingUser>, sqlx::Error> {
        sqlx::query_as::<_, BillingUser>(
            "SELECT id, email, stripe_customer_id FROM users WHERE stripe_customer_id = $1",
        )
        .bind(stripe_customer_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_user_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET stripe_customer_id = $2 WHERE id = $1",
        )
        .bind(user_id)
        .bind(stripe_customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
