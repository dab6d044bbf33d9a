use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use uuid::Uuid;

use crate::responses::JsonResponse;
use crate::routes::auth::claims::{Claims, TokenUse};
use crate::utils::jwt::JwtKeyProvider;

/// An authenticated caller, resolved from `Authorization: Bearer <jwt>`.
#[derive(Debug, PartialEq)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub claims: Claims,
}

impl<S> FromRequestParts<S> for AuthSession
where
    S: JwtKeyProvider + Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let unauthorized = || JsonResponse::unauthorized("Unauthorized");

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| unauthorized())?;
        let claims = state
            .jwt_keys()
            .verify(bearer.token())
            .map_err(|_| unauthorized())?;

        if claims.token_use != TokenUse::Access {
            return Err(unauthorized());
        }
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| unauthorized())?;

        Ok(AuthSession { user_id, claims })
    }
}
