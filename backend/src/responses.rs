use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Envelope for status messages; data-bearing replies serialize their own DTOs instead.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    fn reply(code: StatusCode, msg: &str) -> Response {
        let success = code.is_success();
        let body = JsonResponse {
            status: if success { "success" } else { "error" }.to_string(),
            success,
            message: msg.to_string(),
        };
        (code, Json(body)).into_response()
    }

    pub fn success(msg: &str) -> Response {
        Self::reply(StatusCode::OK, msg)
    }

    pub fn bad_request(msg: &str) -> Response {
        Self::reply(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: &str) -> Response {
        Self::reply(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: &str) -> Response {
        Self::reply(StatusCode::NOT_FOUND, msg)
    }

    pub fn too_many_requests(msg: &str) -> Response {
        Self::reply(StatusCode::TOO_MANY_REQUESTS, msg)
    }

    pub fn server_error(msg: &str) -> Response {
        Self::reply(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}
