use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::db::payment_transaction_repository::PaymentTransactionRepository;
use crate::models::payment_transaction::{
    NewPaymentTransaction, PaymentStatus, PaymentTransaction,
};

pub struct PostgresPaymentTransactionRepository {
    pub pool: PgPool,
}

fn map_row(row: PgRow) -> Result<PaymentTransaction, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = PaymentStatus::parse(&status).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "status".into(),
        source: format!("unknown payment status {status:?}").into(),
    })?;
    Ok(PaymentTransaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PaymentTransactionRepository for PostgresPaymentTransactionRepository {
    async fn insert_transaction(
        &self,
        tx: NewPaymentTransaction,
    ) -> Result<PaymentTransaction, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO payment_transactions (user_id, amount, currency, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, amount, currency, status, created_at
            "#,
        )
        .bind(tx.user_id)
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(tx.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        map_row(row)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<PaymentTransaction>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount, currency, status, created_at
            FROM payment_transactions
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_row).collect()
    }
}
