use core::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub const STATUS_TRIALING: &str = "trialing";
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_PAST_DUE: &str = "past_due";
pub const STATUS_CANCELED: &str = "canceled";

/// Typed view over the provider's subscription status string.
///
/// The stored value stays an open string because `customer.subscription.updated` events copy
/// whatever the provider reports; anything we do not act on lands in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Other(String),
}

impl SubscriptionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            STATUS_TRIALING => SubscriptionStatus::Trialing,
            STATUS_ACTIVE => SubscriptionStatus::Active,
            STATUS_PAST_DUE => SubscriptionStatus::PastDue,
            STATUS_CANCELED => SubscriptionStatus::Canceled,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Trialing => STATUS_TRIALING,
            SubscriptionStatus::Active => STATUS_ACTIVE,
            SubscriptionStatus::PastDue => STATUS_PAST_DUE,
            SubscriptionStatus::Canceled => STATUS_CANCELED,
            SubscriptionStatus::Other(s) => s.as_str(),
        }
    }

    /// Active or trialing subscriptions block a new checkout.
    pub fn is_entitled(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_subscription_id: String,
    pub status: String,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub next_billing_date: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[serde(skip)]
    pub version: i32,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::parse(&self.status)
    }

    pub fn set_status(&mut self, status: SubscriptionStatus, now: OffsetDateTime) {
        self.status = status.as_str().to_string();
        self.updated_at = now;
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub stripe_subscription_id: String,
    pub status: String,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub next_billing_date: Option<OffsetDateTime>,
}

/// `GET /subscription/status` body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusResponse {
    pub id: Uuid,
    #[serde(rename = "userID")]
    pub user_id: Uuid,
    #[serde(rename = "stripeSubscriptionID")]
    pub stripe_subscription_id: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_billing_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&Subscription> for SubscriptionStatusResponse {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id,
            user_id: sub.user_id,
            stripe_subscription_id: sub.stripe_subscription_id.clone(),
            status: sub.status.clone(),
            trial_start: sub.trial_start,
            trial_end: sub.trial_end,
            started_at: sub.started_at,
            next_billing_date: sub.next_billing_date,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

/// `POST /subscription/subscribe` body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentResponse {
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end: Option<OffsetDateTime>,
}

impl From<&Subscription> for EnrollmentResponse {
    fn from(sub: &Subscription) -> Self {
        Self {
            subscription_id: sub.stripe_subscription_id.clone(),
            status: sub.status.clone(),
            trial_start: sub.trial_start,
            trial_end: sub.trial_end,
        }
    }
}
