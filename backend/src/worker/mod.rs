use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};

use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use crate::state::AppState;

const EVENT_LOG_PURGE_INTERVAL: Duration = Duration::from_secs(600);

pub async fn start_background_workers(state: AppState) {
    let event_log = state.stripe_event_log.clone();
    let retention_days = state.config.stripe_event_retention_days;
    tokio::spawn(async move {
        loop {
            purge_processed_events(event_log.as_ref(), retention_days).await;
            sleep(EVENT_LOG_PURGE_INTERVAL).await;
        }
    });
}

/// Forgets webhook event ids older than the retention window. Stripe stops redelivering
/// after a few days, so older ids can no longer show up as duplicates.
pub async fn purge_processed_events(
    event_log: &dyn StripeEventLogRepository,
    retention_days: i32,
) -> Option<u64> {
    match event_log.purge_older_than(retention_days).await {
        Ok(removed) => {
            if removed > 0 {
                info!(removed, retention_days, "purged processed stripe events");
            }
            Some(removed)
        }
        Err(err) => {
            error!(?err, "worker: failed to purge stripe event log");
            None
        }
    }
}
