//! Account-linking routes for signed-in users, mounted under
//! `/api/admin/oauth`.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use fleetdesk_core::UserId;
use fleetdesk_oauth::{
    AuthAction, CallerContext, Outcome, PendingAuthContext, ProviderKind, StateToken,
    UserThirdLink,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::routes::AuthStartResponse;
use super::{AppState, RequireAuth};
use crate::error::ApiError;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/info", get(info))
        .route("/to-bind", post(to_bind))
        .route("/confirm", post(confirm))
        .route("/bind-confirm", post(bind_confirm))
        .route("/unbind", post(unbind))
        .route("/links", get(links))
}

#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    code: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    #[serde(default)]
    code: String,
}

impl CodeRequest {
    fn state(self) -> Result<StateToken, ApiError> {
        if self.code.trim().is_empty() {
            return Err(ApiError::BadRequest {
                reason: "code is required".to_string(),
            });
        }
        Ok(StateToken::new(self.code))
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderRequest {
    op: String,
}

/// What the admin UI needs to show for a pending flow. PKCE and nonce
/// values never leave the server.
#[derive(Debug, Serialize)]
pub struct PendingInfo {
    pub action: AuthAction,
    pub op: String,
    pub user_id: Option<UserId>,
    pub third_name: Option<String>,
    pub third_email: Option<String>,
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PendingAuthContext> for PendingInfo {
    fn from(context: PendingAuthContext) -> Self {
        let (third_name, third_email) = match context.identity {
            Some(identity) => (
                identity
                    .username
                    .clone()
                    .or_else(|| identity.display_name.clone()),
                identity.email,
            ),
            None => (None, None),
        };
        Self {
            action: context.action,
            op: context.provider_id,
            user_id: context.result_user_id,
            third_name,
            third_email,
            device_name: context
                .device
                .map(|device| device.name)
                .filter(|name| !name.is_empty()),
            created_at: context.created_at,
        }
    }
}

/// Serialized [`Outcome`].
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeView {
    LoggedIn { user_id: UserId, registered: bool },
    Bound { user_id: UserId },
    BindRequired { code: String },
}

impl From<Outcome> for OutcomeView {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::LoggedIn {
                user_id,
                registered,
            } => Self::LoggedIn {
                user_id,
                registered,
            },
            Outcome::Bound { user_id } => Self::Bound { user_id },
            Outcome::BindRequired { state } => Self::BindRequired {
                code: state.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkView {
    pub op: String,
    pub third_type: ProviderKind,
    pub third_name: Option<String>,
    pub third_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<UserThirdLink> for LinkView {
    fn from(link: UserThirdLink) -> Self {
        Self {
            op: link.provider_id,
            third_type: link.provider_kind,
            third_name: link.third_name,
            third_email: link.third_email,
            created_at: link.created_at,
        }
    }
}

/// Shows a pending flow, e.g. on the bind page the callback redirects to.
pub async fn info(
    State(state): State<Arc<AppState>>,
    RequireAuth(_): RequireAuth,
    Query(query): Query<CodeQuery>,
) -> Result<Json<PendingInfo>, ApiError> {
    let context = state
        .flow
        .pending_info(&StateToken::new(query.code))
        .await?;
    Ok(Json(context.into()))
}

/// Starts a bind flow for the signed-in user.
pub async fn to_bind(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    Json(request): Json<ProviderRequest>,
) -> Result<Json<AuthStartResponse>, ApiError> {
    let start = state
        .flow
        .begin_auth(AuthAction::Bind, &request.op, CallerContext::user(user_id))
        .await?;
    Ok(Json(AuthStartResponse {
        code: start.state.to_string(),
        url: start.url,
    }))
}

/// Signs the waiting client in as the current user.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    Json(request): Json<CodeRequest>,
) -> Result<Json<OutcomeView>, ApiError> {
    let outcome = state
        .flow
        .confirm_pending(&request.state()?, user_id)
        .await?;
    Ok(Json(outcome.into()))
}

/// Links the parked identity to the current user.
pub async fn bind_confirm(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    Json(request): Json<CodeRequest>,
) -> Result<Json<OutcomeView>, ApiError> {
    let outcome = state.flow.confirm_bind(&request.state()?, user_id).await?;
    Ok(Json(outcome.into()))
}

pub async fn unbind(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    Json(request): Json<ProviderRequest>,
) -> Result<StatusCode, ApiError> {
    state.flow.unbind(user_id, &request.op).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn links(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
) -> Result<Json<Vec<LinkView>>, ApiError> {
    let links = state.flow.linked_accounts(user_id).await?;
    Ok(Json(links.into_iter().map(LinkView::from).collect()))
}
