use async_trait::async_trait;
use uuid::Uuid;

use crate::models::payment_transaction::{NewPaymentTransaction, PaymentTransaction};

/// Append-only ledger of invoice outcomes.
#[async_trait]
pub trait PaymentTransactionRepository: Send + Sync {
    async fn insert_transaction(
        &self,
        tx: NewPaymentTransaction,
    ) -> Result<PaymentTransaction, sqlx::Error>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<PaymentTransaction>, sqlx::Error>;
}
