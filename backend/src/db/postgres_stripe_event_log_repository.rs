use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};

pub struct PostgresStripeEventLogRepository {
    pub pool: PgPool,
}

#[async_trait]
impl StripeEventLogRepository for PostgresStripeEventLogRepository {
    async fn claim_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let claimed = sqlx::query_scalar::<Postgres, String>(
            r#"
            INSERT INTO stripe_event_log (event_id)
            VALUES ($1)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?
        .is_some();

        Ok(claimed)
    }

    async fn release_event(&self, event_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query::<Postgres>("DELETE FROM stripe_event_log WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_older_than(&self, retention_days: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query::<Postgres>(
            "DELETE FROM stripe_event_log WHERE processed_at < now() - make_interval(days => $1)",
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
