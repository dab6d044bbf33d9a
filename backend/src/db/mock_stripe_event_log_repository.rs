use crate::db::stripe_event_log_repository::StripeEventLogRepository;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct MockStripeEventLogRepository {
    events: Arc<Mutex<HashSet<String>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    pub claims: Arc<Mutex<usize>>,
    pub releases: Arc<Mutex<usize>>,
    pub purges: Arc<Mutex<usize>>,
}

impl MockStripeEventLogRepository {
    pub fn recorded_events(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    /// Makes every claim wait before touching the log, like a database round trip.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }
}

#[async_trait]
impl StripeEventLogRepository for MockStripeEventLogRepository {
    async fn claim_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        *self.claims.lock().unwrap() += 1;
        Ok(self.events.lock().unwrap().insert(event_id.to_string()))
    }

    async fn release_event(&self, event_id: &str) -> Result<(), sqlx::Error> {
        *self.releases.lock().unwrap() += 1;
        self.events.lock().unwrap().remove(event_id);
        Ok(())
    }

    async fn purge_older_than(&self, _retention_days: i32) -> Result<u64, sqlx::Error> {
        *self.purges.lock().unwrap() += 1;
        Ok(0)
    }
}
