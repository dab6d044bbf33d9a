use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use lexibill_backend::config::Config;
use lexibill_backend::db::{
    postgres_payment_transaction_repository::PostgresPaymentTransactionRepository,
    postgres_stripe_event_log_repository::PostgresStripeEventLogRepository,
    postgres_subscription_repository::PostgresSubscriptionRepository,
    postgres_user_repository::PostgresUserRepository,
    stripe_event_log_repository::StripeEventLogRepository,
};
use lexibill_backend::responses::JsonResponse;
use lexibill_backend::routes::{health, subscription_routes, webhook_routes};
use lexibill_backend::services::stripe::{LiveStripeService, StripeService};
use lexibill_backend::services::subscriptions::SubscriptionService;
use lexibill_backend::services::webhook::WebhookDispatcher;
use lexibill_backend::utils::jwt::JwtKeys;
use lexibill_backend::{worker, AppState};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "tls")]
use axum_server::tls_rustls::RustlsConfig;

fn init_tracing(config: &Config) -> Option<sentry::ClientInitGuard> {
    let sentry_guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_layer = config
        .log_format_json
        .then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.log_format_json).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_guard.as_ref().map(|_| sentry_tracing::layer()))
        .init();

    sentry_guard
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    let _sentry = init_tracing(&config);

    let jwt_keys = match JwtKeys::from_settings(&config.auth) {
        Ok(keys) => keys,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
            })
            .finish()
            .expect("invalid rate limiter configuration"),
    );

    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let pg_pool = establish_connection(&config.database_url).await;

    let stripe =
        Arc::new(LiveStripeService::from_settings(&config.stripe)) as Arc<dyn StripeService>;
    let stripe_event_log = Arc::new(PostgresStripeEventLogRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn StripeEventLogRepository>;

    let subscriptions = SubscriptionService::new(
        Arc::new(PostgresSubscriptionRepository {
            pool: pg_pool.clone(),
        }),
        Arc::new(PostgresPaymentTransactionRepository {
            pool: pg_pool.clone(),
        }),
        Arc::new(PostgresUserRepository {
            pool: pg_pool.clone(),
        }),
        stripe.clone(),
        config.subscription_settings(),
    );
    let webhooks = WebhookDispatcher::new(stripe, subscriptions.clone(), stripe_event_log.clone());

    let frontend_origin = config
        .frontend_origin
        .parse::<HeaderValue>()
        .expect("FRONTEND_ORIGIN must be a valid header value");
    let addr = config.bind_addr;

    let state = AppState {
        subscriptions,
        webhooks,
        stripe_event_log,
        config: Arc::new(config),
        jwt_keys: Arc::new(jwt_keys),
    };

    let cors = CorsLayer::new()
        .allow_origin(frontend_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    // Only client routes are rate limited.
    let app = Router::new()
        .route("/health", get(health))
        .nest("/webhooks", webhook_routes())
        .nest(
            "/subscription",
            subscription_routes().layer(GovernorLayer {
                config: governor_conf.clone(),
            }),
        )
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    worker::start_background_workers(state).await;

    #[cfg(feature = "tls")]
    {
        // TLS: Only run this block when `--features tls` is used
        let tls_config = RustlsConfig::from_pem_file(
            std::env::var("DEV_CERT_LOCATION").expect("DEV_CERT_LOCATION must be set"),
            std::env::var("DEV_KEY_LOCATION").expect("DEV_KEY_LOCATION must be set"),
        )
        .await
        .expect("Failed to load TLS certs");

        info!(%addr, "listening with TLS");
        let _ = axum_server::bind_rustls(addr, tls_config)
            .serve(make_service)
            .await;

        return; // Skip the fallback if TLS was used
    }

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    info!(%addr, "listening");
    axum::serve(listener, make_service)
        .await
        .expect("server error");
}

/// Connects, verifies the connection and applies pending migrations.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    info!("Successfully connected to the database");
    pool
}
