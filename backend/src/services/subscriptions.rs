use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::payment_transaction_repository::PaymentTransactionRepository;
use crate::db::subscription_repository::SubscriptionRepository;
use crate::db::user_repository::UserRepository;
use crate::models::payment_transaction::{NewPaymentTransaction, PaymentStatus};
use crate::models::subscription::{NewSubscription, Subscription, SubscriptionStatus};
use crate::models::user::BillingUser;
use crate::services::stripe::{
    CheckoutSession, CreateCheckoutSessionRequest, CreateSubscriptionRequest, StripeService,
    StripeServiceError,
};

/// Attempts per read-modify-write before a version conflict is reported.
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("no subscription found for {0}")]
    NotFound(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user {0} has no billing customer")]
    MissingCustomer(Uuid),
    #[error("user {0} already has an active or trialing subscription")]
    AlreadySubscribed(Uuid),
    #[error("checkout urls are not configured")]
    CheckoutUrlsMissing,
    #[error("subscription {id} is {status}; only canceled subscriptions can be purged")]
    PurgeRefused { id: String, status: String },
    #[error("invalid billing event: {0}")]
    InvalidEvent(String),
    #[error("{op}: billing provider error: {source}")]
    Provider {
        op: &'static str,
        source: StripeServiceError,
    },
    #[error("{op}: billing provider timed out")]
    Timeout { op: &'static str },
    #[error("{op}: database error: {source}")]
    Database {
        op: &'static str,
        source: sqlx::Error,
    },
    #[error("{op}: subscription {id} kept changing underneath the update")]
    Conflict { op: &'static str, id: String },
}

#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub price_id: String,
    pub trial_days: u32,
    pub checkout_success_url: Option<String>,
    pub checkout_cancel_url: Option<String>,
    pub provider_timeout: Duration,
}

/// Provider-reported state carried by `customer.subscription.updated`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub stripe_subscription_id: String,
    pub status: String,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
}

/// Keeps local subscription rows in step with the billing provider.
///
/// Every write to an existing row goes through [`SubscriptionService::write_subscription`],
/// which serializes callers per provider subscription id and retries on a stale `version`.
#[derive(Clone)]
pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    payments: Arc<dyn PaymentTransactionRepository>,
    users: Arc<dyn UserRepository>,
    stripe: Arc<dyn StripeService>,
    settings: SubscriptionSettings,
    subscription_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

fn db_error(op: &'static str) -> impl FnOnce(sqlx::Error) -> SubscriptionError {
    move |source| SubscriptionError::Database { op, source }
}

fn from_unix(ts: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).ok()
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentTransactionRepository>,
        users: Arc<dyn UserRepository>,
        stripe: Arc<dyn StripeService>,
        settings: SubscriptionSettings,
    ) -> Self {
        Self {
            subscriptions,
            payments,
            users,
            stripe,
            settings,
            subscription_locks: Arc::new(DashMap::new()),
        }
    }

    async fn call_provider<T, F>(&self, op: &'static str, call: F) -> Result<T, SubscriptionError>
    where
        F: Future<Output = Result<T, StripeServiceError>>,
    {
        match tokio::time::timeout(self.settings.provider_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(SubscriptionError::Provider { op, source }),
            Err(_) => Err(SubscriptionError::Timeout { op }),
        }
    }

    /// Loads the user and creates their billing customer on first use.
    pub async fn ensure_customer(&self, user_id: Uuid) -> Result<BillingUser, SubscriptionError> {
        let mut user = self
            .users
            .find_user_by_id(user_id)
            .await
            .map_err(db_error("ensure_customer"))?
            .ok_or_else(|| SubscriptionError::UserNotFound(user_id.to_string()))?;

        if user.stripe_customer_id.is_some() {
            return Ok(user);
        }

        let customer_id = self
            .call_provider("ensure_customer", self.stripe.create_customer(&user.email))
            .await?;
        self.users
            .set_user_stripe_customer_id(user_id, &customer_id)
            .await
            .map_err(db_error("ensure_customer"))?;
        info!(%user_id, %customer_id, "created billing customer");

        user.stripe_customer_id = Some(customer_id);
        Ok(user)
    }

    /// Starts a trial subscription with the provider and stores the local row.
    pub async fn enroll_user(&self, user: &BillingUser) -> Result<Subscription, SubscriptionError> {
        let customer_id = user
            .stripe_customer_id
            .clone()
            .ok_or(SubscriptionError::MissingCustomer(user.id))?;

        let info = self
            .call_provider(
                "enroll_user",
                self.stripe.create_subscription(CreateSubscriptionRequest {
                    customer_id,
                    price_id: self.settings.price_id.clone(),
                    trial_period_days: self.settings.trial_days,
                }),
            )
            .await?;

        let now = OffsetDateTime::now_utc();
        let sub = self
            .subscriptions
            .insert_subscription(NewSubscription {
                user_id: user.id,
                stripe_subscription_id: info.id.clone(),
                status: info.status.clone(),
                trial_start: Some(info.trial_start.and_then(from_unix).unwrap_or(now)),
                trial_end: info.trial_end.and_then(from_unix),
                started_at: Some(now),
                next_billing_date: info.current_period_end.and_then(from_unix),
            })
            .await
            .map_err(|source| {
                error!(
                    user_id = %user.id,
                    stripe_subscription_id = %info.id,
                    ?source,
                    "provider subscription created but local insert failed"
                );
                SubscriptionError::Database {
                    op: "enroll_user",
                    source,
                }
            })?;

        info!(
            user_id = %user.id,
            stripe_subscription_id = %sub.stripe_subscription_id,
            status = %sub.status,
            "enrolled user"
        );
        Ok(sub)
    }

    pub async fn get_subscription(&self, user_id: Uuid) -> Result<Subscription, SubscriptionError> {
        self.subscriptions
            .find_by_user_id(user_id)
            .await
            .map_err(db_error("get_subscription"))?
            .ok_or_else(|| SubscriptionError::NotFound(format!("user {user_id}")))
    }

    pub async fn cancel_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Subscription, SubscriptionError> {
        let current = self.get_subscription(user_id).await?;
        if current.status().is_terminal() {
            info!(%user_id, stripe_subscription_id = %current.stripe_subscription_id, "subscription already canceled");
            return Ok(current);
        }

        let confirmed = self
            .call_provider(
                "cancel_subscription",
                self.stripe
                    .cancel_subscription(&current.stripe_subscription_id),
            )
            .await?;

        let status = SubscriptionStatus::parse(&confirmed.status);
        let result = self
            .write_subscription(
                "cancel_subscription",
                &current.stripe_subscription_id,
                |sub, now| {
                    sub.set_status(status.clone(), now);
                    true
                },
            )
            .await;

        if let Err(err) = &result {
            error!(
                %user_id,
                stripe_subscription_id = %current.stripe_subscription_id,
                ?err,
                "subscription canceled with provider but local record was not updated"
            );
        }
        result
    }

    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
    ) -> Result<CheckoutSession, SubscriptionError> {
        let user = self
            .users
            .find_user_by_id(user_id)
            .await
            .map_err(db_error("create_checkout_session"))?
            .ok_or_else(|| SubscriptionError::UserNotFound(user_id.to_string()))?;

        let current = self
            .subscriptions
            .find_by_user_id(user_id)
            .await
            .map_err(db_error("create_checkout_session"))?;

        if current
            .as_ref()
            .is_some_and(|sub| sub.status().is_entitled())
        {
            return Err(SubscriptionError::AlreadySubscribed(user_id));
        }

        let (Some(success_url), Some(cancel_url)) = (
            self.settings.checkout_success_url.clone(),
            self.settings.checkout_cancel_url.clone(),
        ) else {
            return Err(SubscriptionError::CheckoutUrlsMissing);
        };

        // An unfinished trial carries over; an expired one is not renewed.
        let now = OffsetDateTime::now_utc();
        let trial_end = current
            .as_ref()
            .and_then(|sub| sub.trial_end)
            .filter(|end| *end > now)
            .map(|end| end.unix_timestamp());

        let customer_email = match user.stripe_customer_id {
            Some(_) => None,
            None => Some(user.email.clone()),
        };

        let session = self
            .call_provider(
                "create_checkout_session",
                self.stripe
                    .create_checkout_session(CreateCheckoutSessionRequest {
                        success_url,
                        cancel_url,
                        price_id: self.settings.price_id.clone(),
                        client_reference_id: Some(user_id.to_string()),
                        customer: user.stripe_customer_id.clone(),
                        customer_email,
                        trial_end,
                        metadata: None,
                    }),
            )
            .await?;

        info!(%user_id, session_id = %session.id, "created checkout session");
        Ok(session)
    }

    /// Records a paid invoice and moves the subscription to `active`.
    ///
    /// The ledger row is written before the status change and is not rolled back if that
    /// change fails, so a resend of the same event appends a second row.
    pub async fn apply_invoice_succeeded(
        &self,
        stripe_subscription_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<(), SubscriptionError> {
        let op = "apply_invoice_succeeded";
        if stripe_subscription_id.is_empty() {
            return Err(SubscriptionError::InvalidEvent(
                "paid invoice has no subscription id".into(),
            ));
        }

        let sub = self
            .subscriptions
            .find_by_stripe_subscription_id(stripe_subscription_id)
            .await
            .map_err(db_error(op))?
            .ok_or_else(|| SubscriptionError::NotFound(stripe_subscription_id.to_string()))?;

        self.payments
            .insert_transaction(NewPaymentTransaction {
                user_id: sub.user_id,
                amount,
                currency: currency.to_string(),
                status: PaymentStatus::Succeeded,
            })
            .await
            .map_err(db_error(op))?;

        self.write_subscription(op, stripe_subscription_id, |sub, now| {
            match sub.status() {
                SubscriptionStatus::Active => false,
                SubscriptionStatus::Canceled => {
                    warn!(
                        stripe_subscription_id = %sub.stripe_subscription_id,
                        "paid invoice for canceled subscription; status left unchanged"
                    );
                    false
                }
                _ => {
                    sub.set_status(SubscriptionStatus::Active, now);
                    true
                }
            }
        })
        .await?;

        Ok(())
    }

    /// Marks the customer's subscription `past_due` and records the failed attempt.
    pub async fn apply_invoice_failed(
        &self,
        stripe_customer_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<(), SubscriptionError> {
        let op = "apply_invoice_failed";
        if stripe_customer_id.is_empty() {
            return Err(SubscriptionError::InvalidEvent(
                "failed invoice has no customer id".into(),
            ));
        }

        let user = self
            .users
            .find_user_by_stripe_customer_id(stripe_customer_id)
            .await
            .map_err(db_error(op))?
            .ok_or_else(|| {
                SubscriptionError::UserNotFound(format!("customer {stripe_customer_id}"))
            })?;

        let sub = self
            .subscriptions
            .find_by_user_id(user.id)
            .await
            .map_err(db_error(op))?
            .ok_or_else(|| SubscriptionError::NotFound(format!("user {}", user.id)))?;

        self.write_subscription(op, &sub.stripe_subscription_id, |sub, now| {
            match sub.status() {
                SubscriptionStatus::PastDue | SubscriptionStatus::Canceled => false,
                _ => {
                    sub.set_status(SubscriptionStatus::PastDue, now);
                    true
                }
            }
        })
        .await?;

        self.payments
            .insert_transaction(NewPaymentTransaction {
                user_id: user.id,
                amount,
                currency: currency.to_string(),
                status: PaymentStatus::Failed,
            })
            .await
            .map_err(db_error(op))?;

        Ok(())
    }

    /// Copies status and trial window from the provider. The provider is authoritative here,
    /// including for rows already canceled locally.
    pub async fn apply_subscription_updated(
        &self,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, SubscriptionError> {
        if update.stripe_subscription_id.is_empty() {
            return Err(SubscriptionError::InvalidEvent(
                "subscription update has no id".into(),
            ));
        }

        self.write_subscription(
            "apply_subscription_updated",
            &update.stripe_subscription_id,
            |sub, now| {
                sub.set_status(SubscriptionStatus::parse(&update.status), now);
                sub.trial_start = update.trial_start;
                sub.trial_end = update.trial_end;
                true
            },
        )
        .await
    }

    pub async fn apply_subscription_deleted(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Subscription, SubscriptionError> {
        if stripe_subscription_id.is_empty() {
            return Err(SubscriptionError::InvalidEvent(
                "subscription deletion has no id".into(),
            ));
        }

        self.write_subscription(
            "apply_subscription_deleted",
            stripe_subscription_id,
            |sub, now| {
                sub.set_status(SubscriptionStatus::Canceled, now);
                true
            },
        )
        .await
    }

    /// Hard-deletes a canceled subscription row. Administrative cleanup only.
    pub async fn purge_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<(), SubscriptionError> {
        let op = "purge_subscription";
        let lock = self.lock_for(stripe_subscription_id);
        let result: Result<(), SubscriptionError> = async {
            let _guard = lock.lock().await;

            let sub = self
                .subscriptions
                .find_by_stripe_subscription_id(stripe_subscription_id)
                .await
                .map_err(db_error(op))?
                .ok_or_else(|| {
                    SubscriptionError::NotFound(stripe_subscription_id.to_string())
                })?;

            if !sub.status().is_terminal() {
                return Err(SubscriptionError::PurgeRefused {
                    id: sub.stripe_subscription_id,
                    status: sub.status,
                });
            }

            self.subscriptions
                .delete_by_stripe_subscription_id(stripe_subscription_id)
                .await
                .map_err(db_error(op))?;
            warn!(%stripe_subscription_id, user_id = %sub.user_id, "purged subscription");
            Ok(())
        }
        .await;

        drop(lock);
        self.release_lock(stripe_subscription_id);
        result
    }

    fn lock_for(&self, stripe_subscription_id: &str) -> Arc<Mutex<()>> {
        self.subscription_locks
            .entry(stripe_subscription_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the lock entry once no caller holds or waits on it.
    fn release_lock(&self, stripe_subscription_id: &str) {
        self.subscription_locks
            .remove_if(stripe_subscription_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Re-reads the row, lets `apply` mutate it and persists the result if `apply` reports a
    /// change. A version mismatch re-runs the cycle on fresh data.
    async fn write_subscription<F>(
        &self,
        op: &'static str,
        stripe_subscription_id: &str,
        mut apply: F,
    ) -> Result<Subscription, SubscriptionError>
    where
        F: FnMut(&mut Subscription, OffsetDateTime) -> bool,
    {
        let lock = self.lock_for(stripe_subscription_id);
        let result: Result<Subscription, SubscriptionError> = async {
            let _guard = lock.lock().await;

            for attempt in 1..=MAX_WRITE_ATTEMPTS {
                let mut sub = self
                    .subscriptions
                    .find_by_stripe_subscription_id(stripe_subscription_id)
                    .await
                    .map_err(db_error(op))?
                    .ok_or_else(|| {
                        SubscriptionError::NotFound(stripe_subscription_id.to_string())
                    })?;

                let previous = sub.status.clone();
                if !apply(&mut sub, OffsetDateTime::now_utc()) {
                    return Ok(sub);
                }

                match self
                    .subscriptions
                    .update_subscription(&sub)
                    .await
                    .map_err(db_error(op))?
                {
                    Some(saved) => {
                        info!(
                            %stripe_subscription_id,
                            from = %previous,
                            to = %saved.status,
                            op,
                            "subscription updated"
                        );
                        return Ok(saved);
                    }
                    None => {
                        warn!(%stripe_subscription_id, attempt, op, "stale subscription version");
                    }
                }
            }

            Err(SubscriptionError::Conflict {
                op,
                id: stripe_subscription_id.to_string(),
            })
        }
        .await;

        drop(lock);
        self.release_lock(stripe_subscription_id);
        result
    }
}
