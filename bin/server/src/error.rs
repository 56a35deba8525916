//! HTTP error responses.
//!
//! Every failure leaves the server as JSON `{"error": <message key>,
//! "message": <text>}`. Server-side faults are logged and their details
//! withheld from the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleetdesk_oauth::OauthError;
use rootcause::prelude::Report;
use serde::Serialize;
use std::fmt;

/// Errors returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// A failure from the sign-in flow.
    Oauth(Report<OauthError>),
    /// The request itself is malformed.
    BadRequest { reason: String },
    /// A database failure outside the flow, e.g. issuing a token.
    Database { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oauth(report) => write!(f, "{}", report.current_context()),
            Self::BadRequest { reason } => write!(f, "bad request: {reason}"),
            Self::Database { details } => write!(f, "database error: {details}"),
        }
    }
}

impl From<Report<OauthError>> for ApiError {
    fn from(report: Report<OauthError>) -> Self {
        Self::Oauth(report)
    }
}

impl From<OauthError> for ApiError {
    fn from(error: OauthError) -> Self {
        Self::Oauth(error.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database {
            details: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Status code for a flow error.
pub(crate) fn status_for(error: &OauthError) -> StatusCode {
    match error {
        OauthError::UnknownProvider { .. } => StatusCode::NOT_FOUND,
        OauthError::ProviderMisconfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        OauthError::Expired => StatusCode::GONE,
        OauthError::NotReady => StatusCode::CONFLICT,
        OauthError::Unauthenticated => StatusCode::UNAUTHORIZED,
        OauthError::ExchangeFailed { .. } => StatusCode::BAD_GATEWAY,
        OauthError::NonceMismatch { .. } => StatusCode::BAD_REQUEST,
        OauthError::AlreadyLinkedToOtherUser { .. }
        | OauthError::ProviderAlreadyBoundForUser { .. } => StatusCode::CONFLICT,
        OauthError::OauthRegisterFailed { .. } | OauthError::Storage { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        OauthError::UserNotFound { .. } | OauthError::LinkNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Oauth(report) => status_for(report.current_context()),
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Oauth(report) => {
                let error = report.current_context();
                let message = if error.is_server_fault() {
                    "Internal server error".to_string()
                } else {
                    error.to_string()
                };
                ErrorBody {
                    error: error.message_key(),
                    message,
                }
            }
            Self::BadRequest { reason } => ErrorBody {
                error: "InvalidRequest",
                message: reason.clone(),
            },
            Self::Database { .. } => ErrorBody {
                error: "OperationFailed",
                message: "Internal server error".to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Oauth(report) => {
                let error = report.current_context();
                if error.is_server_fault()
                    || matches!(error, OauthError::ProviderMisconfigured { .. })
                {
                    tracing::error!("OAuth request failed: {}", report);
                } else if matches!(error, OauthError::ExchangeFailed { .. }) {
                    tracing::warn!("OAuth exchange failed: {}", error);
                }
            }
            Self::Database { details } => {
                tracing::error!("Database error: {}", details);
            }
            Self::BadRequest { .. } => {}
        }

        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetdesk_core::UserId;

    fn status_of(error: OauthError) -> StatusCode {
        ApiError::from(error).into_response().status()
    }

    #[test]
    fn flow_errors_map_to_statuses() {
        assert_eq!(status_of(OauthError::Expired), StatusCode::GONE);
        assert_eq!(status_of(OauthError::NotReady), StatusCode::CONFLICT);
        assert_eq!(
            status_of(OauthError::Unauthenticated),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(OauthError::UnknownProvider {
                provider: "nope".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OauthError::ExchangeFailed {
                provider: "corp".to_string(),
                reason: "invalid_grant".to_string()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(OauthError::AlreadyLinkedToOtherUser {
                provider: "corp".to_string()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OauthError::ProviderAlreadyBoundForUser {
                provider: "corp".to_string(),
                user_id: UserId::new(3)
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OauthError::OauthRegisterFailed {
                reason: "boom".to_string()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn business_conflicts_surface_their_message() {
        let body = ApiError::from(OauthError::AlreadyLinkedToOtherUser {
            provider: "corp".to_string(),
        })
        .body();
        assert_eq!(body.error, "OauthHasBindOtherUser");
        assert!(body.message.contains("corp"));
    }

    #[test]
    fn server_faults_hide_details() {
        let body = ApiError::from(OauthError::Storage {
            details: "connection refused to 10.0.0.5".to_string(),
        })
        .body();
        assert_eq!(body.error, "OperationFailed");
        assert_eq!(body.message, "Internal server error");

        let body = ApiError::Database {
            details: "pool timed out".to_string(),
        }
        .body();
        assert!(!body.message.contains("pool"));
    }

    #[test]
    fn bad_request_is_400() {
        let response = ApiError::BadRequest {
            reason: "missing code".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
