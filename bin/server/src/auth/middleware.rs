//! Authentication extractors for Axum.

use axum::{
    Json,
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use fleetdesk_core::UserId;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use super::AppState;
use crate::error::ErrorBody;

/// Extractor for requiring a user authenticated by bearer token.
pub struct RequireAuth(pub UserId);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthRejection::NotAuthenticated)?;

        let user_id = app_state
            .tokens
            .find_user(bearer.token())
            .await
            .map_err(|e| {
                tracing::error!("Token lookup failed: {}", e);
                AuthRejection::InternalError
            })?
            .ok_or(AuthRejection::NotAuthenticated)?;

        Ok(RequireAuth(user_id))
    }
}

/// Client address, preferring proxy headers over the socket peer.
///
/// Empty when neither is available.
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = parts
            .headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let ip = match forwarded.or(real_ip) {
            Some(ip) => ip.to_string(),
            None => parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_default(),
        };
        Ok(ClientIp(ip))
    }
}

/// Rejection type for authentication extractors.
#[derive(Debug)]
pub enum AuthRejection {
    NotAuthenticated,
    InternalError,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::NotAuthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "NeedLogin",
                    message: "authentication required".to_string(),
                },
            ),
            Self::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "OperationFailed",
                    message: "Internal server error".to_string(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}
