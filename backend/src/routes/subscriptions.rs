use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::models::subscription::{EnrollmentResponse, SubscriptionStatusResponse};
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::services::subscriptions::SubscriptionError;
use crate::state::AppState;

/// Maps synchronizer failures onto the generic messages clients see; details stay in the logs.
fn error_response(err: SubscriptionError, action: &str) -> Response {
    match err {
        SubscriptionError::NotFound(_) => {
            JsonResponse::not_found("No subscription found")
        }
        SubscriptionError::UserNotFound(_) => {
            warn!(?err, action, "authenticated user is unknown");
            JsonResponse::unauthorized("Unauthorized")
        }
        err => {
            error!(?err, action, "subscription request failed");
            JsonResponse::server_error(&format!("Failed to {action}"))
        }
    }
}

// POST /subscription/subscribe
pub async fn subscribe(State(app_state): State<AppState>, session: AuthSession) -> Response {
    let user = match app_state.subscriptions.ensure_customer(session.user_id).await {
        Ok(user) => user,
        Err(err) => return error_response(err, "subscribe user"),
    };

    match app_state.subscriptions.enroll_user(&user).await {
        Ok(sub) => Json(EnrollmentResponse::from(&sub)).into_response(),
        Err(err) => error_response(err, "subscribe user"),
    }
}

// POST /subscription/cancel
pub async fn cancel(State(app_state): State<AppState>, session: AuthSession) -> Response {
    match app_state
        .subscriptions
        .cancel_subscription(session.user_id)
        .await
    {
        Ok(sub) => Json(json!({
            "message": "Subscription successfully cancelled",
            "subscription": SubscriptionStatusResponse::from(&sub),
        }))
        .into_response(),
        Err(err) => error_response(err, "cancel subscription"),
    }
}

// GET /subscription/status
pub async fn status(State(app_state): State<AppState>, session: AuthSession) -> Response {
    match app_state
        .subscriptions
        .get_subscription(session.user_id)
        .await
    {
        Ok(sub) => Json(SubscriptionStatusResponse::from(&sub)).into_response(),
        Err(err) => error_response(err, "get subscription status"),
    }
}

// POST /subscription/checkout
pub async fn checkout(State(app_state): State<AppState>, session: AuthSession) -> Response {
    match app_state
        .subscriptions
        .create_checkout_session(session.user_id)
        .await
    {
        Ok(checkout) => Json(json!({ "id": checkout.id, "url": checkout.url })).into_response(),
        Err(err) => error_response(err, "create checkout session"),
    }
}
