use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use crate::services::stripe::{StripeEvent, StripeService, StripeServiceError};
use crate::services::subscriptions::{SubscriptionService, SubscriptionUpdate};

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook verification failed: {0}")]
    Verification(#[from] StripeServiceError),
    #[error("malformed {event_type} event: {reason}")]
    Malformed { event_type: String, reason: String },
}

/// The billing notifications the synchronizer reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    InvoicePaid {
        stripe_subscription_id: String,
        amount: i64,
        currency: String,
    },
    InvoicePaymentFailed {
        stripe_customer_id: String,
        amount: i64,
        currency: String,
    },
    SubscriptionUpdated(SubscriptionUpdate),
    SubscriptionDeleted {
        stripe_subscription_id: String,
    },
    Unhandled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Ignored,
    Duplicate,
    /// Verified but not applied. The claim on the event id is dropped, so a manual resend
    /// is processed again; the route still acknowledges, so Stripe does not retry on its own.
    Failed,
}

fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

/// Expanded references arrive as objects, collapsed ones as bare id strings.
fn extract_ref(val: &Value, path: &[&str]) -> Option<String> {
    let v = jget(val, path)?;
    v.as_str()
        .or_else(|| v.get("id").and_then(|id| id.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_ts(val: &Value, path: &[&str]) -> Option<OffsetDateTime> {
    jget(val, path)?
        .as_i64()
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

impl BillingEvent {
    pub fn classify(event: &StripeEvent) -> Result<Self, WebhookError> {
        let object = jget(&event.payload, &["data", "object"]);
        let malformed = |reason: &str| WebhookError::Malformed {
            event_type: event.r#type.clone(),
            reason: reason.to_string(),
        };

        match event.r#type.as_str() {
            "invoice.paid" => {
                let obj = object.ok_or_else(|| malformed("missing data.object"))?;
                let stripe_subscription_id =
                    extract_ref(obj, &["parent", "subscription_details", "subscription"])
                        .or_else(|| extract_ref(obj, &["subscription"]))
                        .ok_or_else(|| malformed("missing subscription id"))?;
                Ok(BillingEvent::InvoicePaid {
                    stripe_subscription_id,
                    amount: obj.get("amount_paid").and_then(Value::as_i64).unwrap_or(0),
                    currency: currency_of(obj),
                })
            }
            "invoice.payment_failed" => {
                let obj = object.ok_or_else(|| malformed("missing data.object"))?;
                let stripe_customer_id = extract_ref(obj, &["customer"])
                    .ok_or_else(|| malformed("missing customer id"))?;
                Ok(BillingEvent::InvoicePaymentFailed {
                    stripe_customer_id,
                    amount: obj.get("amount_due").and_then(Value::as_i64).unwrap_or(0),
                    currency: currency_of(obj),
                })
            }
            "customer.subscription.updated" => {
                let obj = object.ok_or_else(|| malformed("missing data.object"))?;
                let stripe_subscription_id =
                    extract_ref(obj, &["id"]).ok_or_else(|| malformed("missing subscription id"))?;
                let status = obj
                    .get("status")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("missing status"))?
                    .to_string();
                Ok(BillingEvent::SubscriptionUpdated(SubscriptionUpdate {
                    stripe_subscription_id,
                    status,
                    trial_start: extract_ts(obj, &["trial_start"]),
                    trial_end: extract_ts(obj, &["trial_end"]),
                }))
            }
            "customer.subscription.deleted" => {
                let obj = object.ok_or_else(|| malformed("missing data.object"))?;
                let stripe_subscription_id =
                    extract_ref(obj, &["id"]).ok_or_else(|| malformed("missing subscription id"))?;
                Ok(BillingEvent::SubscriptionDeleted {
                    stripe_subscription_id,
                })
            }
            other => Ok(BillingEvent::Unhandled(other.to_string())),
        }
    }
}

fn currency_of(obj: &Value) -> String {
    obj.get("currency")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Verifies inbound billing notifications and hands them to the synchronizer once each.
#[derive(Clone)]
pub struct WebhookDispatcher {
    stripe: Arc<dyn StripeService>,
    subscriptions: SubscriptionService,
    event_log: Arc<dyn StripeEventLogRepository>,
}

impl WebhookDispatcher {
    pub fn new(
        stripe: Arc<dyn StripeService>,
        subscriptions: SubscriptionService,
        event_log: Arc<dyn StripeEventLogRepository>,
    ) -> Self {
        Self {
            stripe,
            subscriptions,
            event_log,
        }
    }

    /// Only a verification failure is an error; everything after that is reported through
    /// the outcome and logged.
    pub async fn dispatch(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        let event = self.stripe.verify_webhook(payload, signature_header)?;
        Ok(self.handle_event(&event).await)
    }

    async fn handle_event(&self, event: &StripeEvent) -> WebhookOutcome {
        let event_id = event.id.as_str();
        let event_type = event.r#type.as_str();

        let billing_event = match BillingEvent::classify(event) {
            Ok(ev) => ev,
            Err(err) => {
                warn!(?err, event_id, "dropping malformed stripe event");
                return WebhookOutcome::Failed;
            }
        };

        // Concurrent deliveries of one id race on this insert.
        let claimed = match self.event_log.claim_event(event_id).await {
            Ok(true) => true,
            Ok(false) => {
                info!(event_id, event_type, "skipping already processed stripe event");
                return WebhookOutcome::Duplicate;
            }
            Err(err) => {
                // Log unavailable: process without dedup.
                warn!(?err, event_id, "failed to claim stripe event");
                false
            }
        };

        let result = match billing_event {
            BillingEvent::InvoicePaid {
                stripe_subscription_id,
                amount,
                currency,
            } => self
                .subscriptions
                .apply_invoice_succeeded(&stripe_subscription_id, amount, &currency)
                .await
                .map(|_| WebhookOutcome::Applied),
            BillingEvent::InvoicePaymentFailed {
                stripe_customer_id,
                amount,
                currency,
            } => self
                .subscriptions
                .apply_invoice_failed(&stripe_customer_id, amount, &currency)
                .await
                .map(|_| WebhookOutcome::Applied),
            BillingEvent::SubscriptionUpdated(update) => self
                .subscriptions
                .apply_subscription_updated(update)
                .await
                .map(|_| WebhookOutcome::Applied),
            BillingEvent::SubscriptionDeleted {
                stripe_subscription_id,
            } => self
                .subscriptions
                .apply_subscription_deleted(&stripe_subscription_id)
                .await
                .map(|_| WebhookOutcome::Applied),
            BillingEvent::Unhandled(kind) => {
                info!(event_id, event_type = %kind, "ignoring unhandled stripe event");
                Ok(WebhookOutcome::Ignored)
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(?err, event_id, event_type, "failed to apply stripe event");
                if claimed {
                    if let Err(err) = self.event_log.release_event(event_id).await {
                        error!(?err, event_id, "failed to release stripe event claim");
                    }
                }
                WebhookOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::{
        InMemoryPaymentLedger, InMemorySubscriptionRepository, MockUserRepository,
    };
    use crate::db::mock_stripe_event_log_repository::MockStripeEventLogRepository;
    use crate::db::subscription_repository::SubscriptionRepository;
    use crate::models::subscription::NewSubscription;
    use crate::models::user::BillingUser;
    use crate::services::stripe::MockStripeService;
    use crate::services::subscriptions::SubscriptionSettings;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    struct Harness {
        dispatcher: WebhookDispatcher,
        subs: InMemorySubscriptionRepository,
        ledger: InMemoryPaymentLedger,
        log: MockStripeEventLogRepository,
        user: BillingUser,
    }

    async fn harness(initial_status: &str) -> Harness {
        harness_with_log(initial_status, MockStripeEventLogRepository::default()).await
    }

    async fn harness_with_log(initial_status: &str, log: MockStripeEventLogRepository) -> Harness {
        let user = BillingUser {
            id: Uuid::new_v4(),
            email: "learner@example.com".into(),
            stripe_customer_id: Some("cus_1".into()),
        };
        let users = MockUserRepository::new().with_user(user.clone());
        let subs = InMemorySubscriptionRepository::new();
        let ledger = InMemoryPaymentLedger::new();
        let stripe = Arc::new(MockStripeService::new());

        subs.insert_subscription(NewSubscription {
            user_id: user.id,
            stripe_subscription_id: "sub_1".into(),
            status: initial_status.into(),
            trial_start: None,
            trial_end: None,
            started_at: None,
            next_billing_date: None,
        })
        .await
        .unwrap();

        let service = SubscriptionService::new(
            Arc::new(subs.clone()),
            Arc::new(ledger.clone()),
            Arc::new(users),
            stripe.clone(),
            SubscriptionSettings {
                price_id: "price_paid".into(),
                trial_days: 7,
                checkout_success_url: None,
                checkout_cancel_url: None,
                provider_timeout: Duration::from_secs(5),
            },
        );
        let dispatcher = WebhookDispatcher::new(stripe, service, Arc::new(log.clone()));
        Harness {
            dispatcher,
            subs,
            ledger,
            log,
            user,
        }
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn invoice_paid(event_id: &str) -> Vec<u8> {
        body(json!({
            "id": event_id,
            "type": "invoice.paid",
            "data": { "object": {
                "customer": "cus_1",
                "amount_paid": 500,
                "currency": "usd",
                "parent": { "subscription_details": { "subscription": "sub_1" } }
            }}
        }))
    }

    #[test]
    fn classify_reads_legacy_invoice_subscription_field() {
        let event = StripeEvent {
            id: "evt_1".into(),
            r#type: "invoice.paid".into(),
            payload: json!({ "data": { "object": {
                "subscription": { "id": "sub_9" },
                "amount_paid": 700,
                "currency": "eur"
            }}}),
        };
        assert_eq!(
            BillingEvent::classify(&event).unwrap(),
            BillingEvent::InvoicePaid {
                stripe_subscription_id: "sub_9".into(),
                amount: 700,
                currency: "eur".into(),
            }
        );
    }

    #[test]
    fn classify_subscription_update_reads_trial_window() {
        let event = StripeEvent {
            id: "evt_1".into(),
            r#type: "customer.subscription.updated".into(),
            payload: json!({ "data": { "object": {
                "id": "sub_1",
                "status": "active",
                "trial_start": 1_700_000_000,
                "trial_end": null
            }}}),
        };
        let BillingEvent::SubscriptionUpdated(update) = BillingEvent::classify(&event).unwrap()
        else {
            panic!("expected subscription update");
        };
        assert_eq!(update.status, "active");
        assert_eq!(
            update.trial_start,
            Some(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap())
        );
        assert_eq!(update.trial_end, None);
    }

    #[test]
    fn classify_rejects_invoice_without_subscription() {
        let event = StripeEvent {
            id: "evt_1".into(),
            r#type: "invoice.paid".into(),
            payload: json!({ "data": { "object": { "amount_paid": 500 } } }),
        };
        assert!(matches!(
            BillingEvent::classify(&event),
            Err(WebhookError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn invoice_paid_activates_and_records_event() {
        let h = harness("trialing").await;

        let outcome = h
            .dispatcher
            .dispatch(&invoice_paid("evt_1"), "t=1,v1=sig")
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::Applied);
        assert_eq!(h.subs.all()[0].status, "active");
        assert_eq!(h.ledger.all().len(), 1);
        assert_eq!(h.log.recorded_events(), vec!["evt_1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_processed_once() {
        let h = harness("trialing").await;

        h.dispatcher
            .dispatch(&invoice_paid("evt_1"), "t=1,v1=sig")
            .await
            .unwrap();
        let again = h
            .dispatcher
            .dispatch(&invoice_paid("evt_1"), "t=1,v1=sig")
            .await
            .unwrap();

        assert_eq!(again, WebhookOutcome::Duplicate);
        assert_eq!(h.ledger.all().len(), 1);
        assert_eq!(*h.log.claims.lock().unwrap(), 2);
        assert_eq!(h.log.recorded_events(), vec!["evt_1".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_deliveries_of_one_event_apply_once() {
        let log = MockStripeEventLogRepository::default().with_latency(Duration::from_millis(10));
        let h = harness_with_log("trialing", log).await;
        let payload = invoice_paid("evt_1");

        let (first, second) = tokio::join!(
            h.dispatcher.dispatch(&payload, "t=1,v1=sig"),
            h.dispatcher.dispatch(&payload, "t=1,v1=sig")
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| *o == WebhookOutcome::Duplicate);

        assert_eq!(
            outcomes,
            vec![WebhookOutcome::Applied, WebhookOutcome::Duplicate]
        );
        assert_eq!(h.ledger.all().len(), 1);
        assert_eq!(h.subs.all()[0].status, "active");
    }

    #[tokio::test]
    async fn payment_failed_routes_by_customer() {
        let h = harness("active").await;
        let payload = body(json!({
            "id": "evt_2",
            "type": "invoice.payment_failed",
            "data": { "object": { "customer": "cus_1", "amount_due": 900, "currency": "usd" } }
        }));

        let outcome = h.dispatcher.dispatch(&payload, "t=1,v1=sig").await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Applied);
        assert_eq!(h.subs.all()[0].status, "past_due");
        let ledger = h.ledger.all();
        assert_eq!(ledger[0].user_id, h.user.id);
        assert_eq!(ledger[0].amount, 900);
    }

    #[tokio::test]
    async fn subscription_deleted_cancels_row() {
        let h = harness("active").await;
        let payload = body(json!({
            "id": "evt_3",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_1", "status": "canceled" } }
        }));

        let outcome = h.dispatcher.dispatch(&payload, "t=1,v1=sig").await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied);
        assert_eq!(h.subs.all()[0].status, "canceled");
    }

    #[tokio::test]
    async fn unknown_event_is_ignored_and_recorded() {
        let h = harness("active").await;
        let payload = body(json!({
            "id": "evt_4",
            "type": "customer.created",
            "data": { "object": { "id": "cus_2" } }
        }));

        let outcome = h.dispatcher.dispatch(&payload, "t=1,v1=sig").await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert_eq!(h.log.recorded_events(), vec!["evt_4".to_string()]);
        assert_eq!(h.subs.all()[0].status, "active");
    }

    #[tokio::test]
    async fn failed_application_is_not_recorded() {
        let h = harness("active").await;
        let payload = body(json!({
            "id": "evt_5",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_unknown" } }
        }));

        let outcome = h.dispatcher.dispatch(&payload, "t=1,v1=sig").await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Failed);
        assert_eq!(*h.log.releases.lock().unwrap(), 1);
        assert!(h.log.recorded_events().is_empty());
    }

    #[tokio::test]
    async fn released_event_is_processed_on_resend() {
        let h = harness("trialing").await;
        let payload = body(json!({
            "id": "evt_6",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_1" } }
        }));
        h.subs.set_failing(true);
        let first = h.dispatcher.dispatch(&payload, "t=1,v1=sig").await.unwrap();
        h.subs.set_failing(false);
        let resend = h.dispatcher.dispatch(&payload, "t=1,v1=sig").await.unwrap();

        assert_eq!(first, WebhookOutcome::Failed);
        assert_eq!(resend, WebhookOutcome::Applied);
        assert_eq!(h.subs.all()[0].status, "canceled");
    }

    #[tokio::test]
    async fn unverified_payload_is_rejected() {
        let h = harness("trialing").await;
        let err = h
            .dispatcher
            .dispatch(&invoice_paid("evt_1"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Verification(_)));
        assert_eq!(*h.log.claims.lock().unwrap(), 0);
        assert_eq!(h.subs.all()[0].status, "trialing");
    }
}
