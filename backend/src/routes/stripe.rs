use axum::body::Bytes;
use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse, response::Response};
use tracing::{debug, warn};

use crate::responses::JsonResponse;
use crate::state::AppState;

// POST /webhooks/stripe
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature"),
    };

    match app_state.webhooks.dispatch(&body, sig).await {
        Ok(outcome) => {
            debug!(?outcome, "stripe webhook handled");
            Json(serde_json::json!({ "received": true })).into_response()
        }
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            JsonResponse::bad_request("Invalid webhook signature")
        }
    }
}
