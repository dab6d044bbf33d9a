use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The slice of an identity record the billing code needs.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq)]
pub struct BillingUser {
    pub id: uuid::Uuid,
    pub email: String,
    pub stripe_customer_id: Option<String>,
}
