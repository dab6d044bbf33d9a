use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;

use lexibill_backend::config::Config;
use lexibill_backend::db::{
    postgres_payment_transaction_repository::PostgresPaymentTransactionRepository,
    postgres_subscription_repository::PostgresSubscriptionRepository,
    postgres_user_repository::PostgresUserRepository,
};
use lexibill_backend::services::stripe::LiveStripeService;
use lexibill_backend::services::subscriptions::SubscriptionService;

/// Usage: purge_subscription <stripe_subscription_id>
///
/// Removes the local row of a subscription that is already canceled.
#[tokio::main]
async fn main() -> Result<()> {
    let Some(stripe_subscription_id) = env::args().nth(1) else {
        bail!("usage: purge_subscription <stripe_subscription_id>");
    };

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    let service = SubscriptionService::new(
        Arc::new(PostgresSubscriptionRepository { pool: pool.clone() }),
        Arc::new(PostgresPaymentTransactionRepository { pool: pool.clone() }),
        Arc::new(PostgresUserRepository { pool: pool.clone() }),
        Arc::new(LiveStripeService::from_settings(&config.stripe)),
        config.subscription_settings(),
    );

    service
        .purge_subscription(&stripe_subscription_id)
        .await
        .with_context(|| format!("failed to purge subscription {stripe_subscription_id}"))?;

    println!("Purged subscription {stripe_subscription_id}.");
    Ok(())
}
