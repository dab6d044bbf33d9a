use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::subscription::{NewSubscription, Subscription};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id,
    user_id,
    stripe_subscription_id,
    status,
    trial_start,
    trial_end,
    started_at,
    next_billing_date,
    created_at,
    updated_at,
    version
"#;

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert_subscription(
        &self,
        new_sub: NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions (
                user_id, stripe_subscription_id, status, trial_start, trial_end,
                started_at, next_billing_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(new_sub.user_id)
            .bind(&new_sub.stripe_subscription_id)
            .bind(&new_sub.status)
            .bind(new_sub.trial_start)
            .bind(new_sub.trial_end)
            .bind(new_sub.started_at)
            .bind(new_sub.next_billing_date)
            .fetch_one(&self.pool)
            .await
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1"
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(stripe_subscription_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn update_subscription(
        &self,
        sub: &Subscription,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE subscriptions
            SET status = $3,
                trial_start = $4,
                trial_end = $5,
                started_at = $6,
                next_billing_date = $7,
                updated_at = $8,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(sub.id)
            .bind(sub.version)
            .bind(&sub.status)
            .bind(sub.trial_start)
            .bind(sub.trial_end)
            .bind(sub.started_at)
            .bind(sub.next_billing_date)
            .bind(sub.updated_at)
            .fetch_optional(&self.pool)
            .await
    }

    async fn delete_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE stripe_subscription_id = $1")
            .bind(stripe_subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
