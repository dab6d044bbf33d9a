use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use uuid::Uuid;

use super::payment_transaction_repository::PaymentTransactionRepository;
use super::subscription_repository::SubscriptionRepository;
use super::user_repository::UserRepository;
use crate::models::payment_transaction::{NewPaymentTransaction, PaymentTransaction};
use crate::models::subscription::{NewSubscription, Subscription};
use crate::models::user::BillingUser;

fn mock_failure() -> sqlx::Error {
    sqlx::Error::Protocol("Mock DB failure".into())
}

/// Subscription store backed by a vector. Enforces the unique provider id and the version
/// check the Postgres implementation relies on.
#[derive(Clone, Default)]
pub struct InMemorySubscriptionRepository {
    rows: Arc<Mutex<Vec<Subscription>>>,
    pub should_fail: Arc<Mutex<bool>>,
    /// Fails only `update_subscription`; reads keep working.
    pub fail_updates: Arc<Mutex<bool>>,
    /// Each pending conflict makes the next update lose a race against another writer.
    pub pending_conflicts: Arc<Mutex<usize>>,
    pub update_calls: Arc<Mutex<usize>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Subscription> {
        self.rows.lock().unwrap().clone()
    }

    pub fn set_failing_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    pub fn set_failing(&self, fail: bool) {
        *self.should_fail.lock().unwrap() = fail;
    }

    pub fn inject_conflicts(&self, count: usize) {
        *self.pending_conflicts.lock().unwrap() = count;
    }

    fn check_failure(&self) -> Result<(), sqlx::Error> {
        if *self.should_fail.lock().unwrap() {
            return Err(mock_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert_subscription(
        &self,
        new_sub: NewSubscription,
    ) -> Result<Subscription, sqlx::Error> {
        self.check_failure()?;
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|r| r.stripe_subscription_id == new_sub.stripe_subscription_id)
        {
            return Err(sqlx::Error::Protocol(
                "duplicate stripe_subscription_id".into(),
            ));
        }
        let now = OffsetDateTime::now_utc();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: new_sub.user_id,
            stripe_subscription_id: new_sub.stripe_subscription_id,
            status: new_sub.status,
            trial_start: new_sub.trial_start,
            trial_end: new_sub.trial_end,
            started_at: new_sub.started_at,
            next_billing_date: new_sub.next_billing_date,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        rows.push(sub.clone());
        Ok(sub)
    }

    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        self.check_failure()?;
        // later pushes win ties on created_at
        let rows = self.rows.lock().unwrap();
        let mut latest: Option<&Subscription> = None;
        for row in rows.iter().filter(|r| r.user_id == user_id) {
            if latest.map_or(true, |l| row.created_at >= l.created_at) {
                latest = Some(row);
            }
        }
        Ok(latest.cloned())
    }

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.check_failure()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.stripe_subscription_id == stripe_subscription_id)
            .cloned())
    }

    async fn update_subscription(
        &self,
        sub: &Subscription,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.check_failure()?;
        if *self.fail_updates.lock().unwrap() {
            return Err(mock_failure());
        }
        *self.update_calls.lock().unwrap() += 1;
        let mut rows = self.rows.lock().unwrap();
        let Some(stored) = rows.iter_mut().find(|r| r.id == sub.id) else {
            return Ok(None);
        };

        let mut conflicts = self.pending_conflicts.lock().unwrap();
        if *conflicts > 0 {
            *conflicts -= 1;
            stored.version += 1;
            return Ok(None);
        }

        if stored.version != sub.version {
            return Ok(None);
        }

        stored.status = sub.status.clone();
        stored.trial_start = sub.trial_start;
        stored.trial_end = sub.trial_end;
        stored.started_at = sub.started_at;
        stored.next_billing_date = sub.next_billing_date;
        stored.updated_at = sub.updated_at;
        stored.version += 1;
        Ok(Some(stored.clone()))
    }

    async fn delete_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<bool, sqlx::Error> {
        self.check_failure()?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.stripe_subscription_id != stripe_subscription_id);
        Ok(rows.len() != before)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPaymentLedger {
    entries: Arc<Mutex<Vec<PaymentTransaction>>>,
    pub should_fail: Arc<Mutex<bool>>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<PaymentTransaction> {
        self.entries.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.should_fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl PaymentTransactionRepository for InMemoryPaymentLedger {
    async fn insert_transaction(
        &self,
        tx: NewPaymentTransaction,
    ) -> Result<PaymentTransaction, sqlx::Error> {
        if *self.should_fail.lock().unwrap() {
            return Err(mock_failure());
        }
        let row = PaymentTransaction {
            id: Uuid::new_v4(),
            user_id: tx.user_id,
            amount: tx.amount,
            currency: tx.currency,
            status: tx.status,
            created_at: OffsetDateTime::now_utc(),
        };
        self.entries.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<PaymentTransaction>, sqlx::Error> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct MockUserRepository {
    users: Arc<Mutex<HashMap<Uuid, BillingUser>>>,
    pub should_fail: Arc<Mutex<bool>>,
}

impl MockUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: BillingUser) -> Self {
        self.insert(user);
        self
    }

    pub fn insert(&self, user: BillingUser) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn get(&self, user_id: Uuid) -> Option<BillingUser> {
        self.users.lock().unwrap().get(&user_id).cloned()
    }

    fn check_failure(&self) -> Result<(), sqlx::Error> {
        if *self.should_fail.lock().unwrap() {
            return Err(mock_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<BillingUser>, sqlx::Error> {
        self.check_failure()?;
        Ok(self.get(user_id))
    }

    async fn find_user_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<BillingUser>, sqlx::Error> {
        self.check_failure()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .cloned())
    }

    async fn set_user_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        self.check_failure()?;
        match self.users.lock().unwrap().get_mut(&user_id) {
            Some(user) => {
                user.stripe_customer_id = Some(stripe_customer_id.to_string());
                Ok(())
            }
            None => Err(sqlx::Error::RowNotFound),
        }
    }
}
