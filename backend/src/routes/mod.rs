pub mod auth;
pub mod stripe;
pub mod subscriptions;

use axum::{
    extract::DefaultBodyLimit,
    response::Response,
    routing::{get, post},
    Router,
};

use crate::responses::JsonResponse;
use crate::state::AppState;

/// Stripe events are small; anything larger is refused before it is read.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 65_536;

/// Public provider callbacks, nested under `/webhooks`.
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/stripe", post(stripe::webhook))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES))
}

/// Authenticated subscription endpoints, nested under `/subscription`.
pub fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscriptions::subscribe))
        .route("/cancel", post(subscriptions::cancel))
        .route("/status", get(subscriptions::status))
        .route("/checkout", post(subscriptions::checkout))
}

pub async fn health() -> Response {
    JsonResponse::success("ok")
}
