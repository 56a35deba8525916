//! Public OIDC routes: begin sign-in, provider callback, and result polling.

use axum::{
    Json, Router,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use fleetdesk_oauth::{
    AuthAction, CallerContext, DeviceContext, LocalUser, OauthError, Outcome, StateToken,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AppState, ClientIp};
use crate::db::LoginLogEntry;
use crate::error::ApiError;

/// Routes mounted under `/api/oidc`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/oidc/auth", post(oidc_auth))
        .route("/api/oidc/callback", get(oidc_callback))
        .route("/api/oidc/auth-query", get(oidc_auth_query))
}

/// Body of a sign-in request from a client.
#[derive(Debug, Deserialize)]
pub struct OidcAuthRequest {
    /// Provider id.
    op: String,
    /// Remote-desktop id of the requesting device.
    #[serde(default)]
    id: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    device_info: DeviceInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    os: String,
    /// Client type, e.g. `webadmin`.
    #[serde(default, rename = "type")]
    client: String,
}

impl OidcAuthRequest {
    fn device(&self) -> DeviceContext {
        DeviceContext {
            device_id: self.id.clone(),
            uuid: self.uuid.clone(),
            name: self.device_info.name.clone(),
            os: self.device_info.os.clone(),
            client: self.device_info.client.clone(),
        }
    }
}

/// Where to send the browser, and the code to poll with.
#[derive(Debug, Serialize)]
pub struct AuthStartResponse {
    pub code: String,
    pub url: String,
}

/// Starts a login flow for an unauthenticated client.
pub async fn oidc_auth(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OidcAuthRequest>,
) -> Result<Json<AuthStartResponse>, ApiError> {
    let device = request.device();
    let start = state
        .flow
        .begin_auth(
            AuthAction::Login,
            &request.op,
            CallerContext::anonymous(Some(device)),
        )
        .await?;

    Ok(Json(AuthStartResponse {
        code: start.state.to_string(),
        url: start.url,
    }))
}

/// Query parameters for the provider callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code: Option<String>,
    /// Set by the provider when the user denied consent.
    #[serde(default)]
    error: Option<String>,
}

/// Handles the provider redirect after the user authenticates.
///
/// Renders a result page for the browser, or redirects into the admin UI
/// when the identity needs an explicit bind or the flow came from it.
pub async fn oidc_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(state_token) = query
        .state
        .filter(|s| !s.is_empty())
        .map(StateToken::new)
    else {
        return result_page(false, "ParamIsEmpty", Some("state"));
    };
    if let Some(error) = query.error {
        tracing::warn!(error = %error, "provider returned an error to the callback");
        return result_page(false, "OauthFailed", Some(&error));
    }
    let code = query.code.unwrap_or_default();

    match state.flow.handle_callback(&state_token, &code).await {
        Ok(Outcome::BindRequired { state: parked }) => {
            Redirect::to(&format!("/_admin/#/oauth/bind/{parked}")).into_response()
        }
        Ok(Outcome::Bound { .. }) => result_page(true, "BindSuccess", None),
        Ok(Outcome::LoggedIn { .. }) => {
            let from_web_admin = state
                .flow
                .pending_info(&state_token)
                .await
                .ok()
                .and_then(|context| context.device)
                .is_some_and(|device| device.is_web_admin());
            if from_web_admin {
                Redirect::to("/_admin/#/").into_response()
            } else {
                result_page(true, "OauthSuccess", None)
            }
        }
        Err(report) => {
            let error = report.current_context();
            if error.is_server_fault() {
                tracing::error!("OAuth callback failed: {}", report);
            }
            let detail = match error {
                OauthError::ExchangeFailed { reason, .. } => Some(reason.as_str()),
                _ => None,
            };
            result_page(false, error.message_key(), detail)
        }
    }
}

/// Query parameters for result polling.
#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    code: String,
}

/// Reply for a completed login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(rename = "type")]
    pub token_type: &'static str,
    pub user: UserPayload,
}

/// Public view of a local user.
#[derive(Debug, Serialize)]
pub struct UserPayload {
    pub name: String,
    pub email: String,
    pub nickname: String,
    pub group_id: i64,
}

impl From<LocalUser> for UserPayload {
    fn from(user: LocalUser) -> Self {
        Self {
            name: user.username,
            email: user.email.unwrap_or_default(),
            nickname: user.nickname.unwrap_or_default(),
            group_id: user.group_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct InProgressResponse {
    message: &'static str,
    error: &'static str,
}

/// Polls a flow. A completed login is exchanged for a bearer token.
pub async fn oidc_auth_query(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Query(query): Query<AuthQuery>,
) -> Result<Response, ApiError> {
    let state_token = StateToken::new(query.code);
    let context = match state.flow.poll_result(&state_token).await {
        Ok(context) => context,
        Err(report) if matches!(report.current_context(), OauthError::NotReady) => {
            return Ok(Json(InProgressResponse {
                message: "Authorization in progress, please login and bind",
                error: "No authed oidc is found",
            })
            .into_response());
        }
        Err(report) => return Err(report.into()),
    };

    // poll_result only returns resolved contexts.
    let Some(user_id) = context.result_user_id else {
        return Err(OauthError::NotReady.into());
    };
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(|e| ApiError::Database {
            details: e.to_string(),
        })?
        .ok_or(OauthError::UserNotFound { user_id })?;

    if context.action == AuthAction::Bind {
        return Ok(Json(serde_json::json!({
            "message": "BindSuccess",
            "user": UserPayload::from(user),
        }))
        .into_response());
    }

    let entry = LoginLogEntry::from_device(context.device.as_ref(), ip);
    let issued = state
        .tokens
        .issue(user.id, &entry, state.token_config.lifetime())
        .await?;
    tracing::info!(target: "audit", user_id = %user.id, client = %entry.client, "oauth login");

    Ok(Json(LoginResponse {
        access_token: issued.token,
        token_type: "access_token",
        user: UserPayload::from(user),
    })
    .into_response())
}

/// Minimal result page shown in the browser tab that completed the flow.
fn result_page(success: bool, message: &str, detail: Option<&str>) -> Response {
    let title = if success {
        "Authorization succeeded"
    } else {
        "Authorization failed"
    };
    let detail = detail
        .map(|d| format!("<p class=\"detail\">{}</p>", escape_html(d)))
        .unwrap_or_default();
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n<p class=\"message\" data-key=\"{key}\">{key}</p>\n{detail}\n<p>You can close this window.</p>\n</body>\n</html>\n",
        key = escape_html(message),
    ))
    .into_response()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use crate::testing::test_state;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn begin_login(app: &Router, client: &str) -> AuthStartResponse {
        let body = serde_json::json!({
            "op": "corp",
            "id": "123456789",
            "uuid": "uuid-1",
            "device_info": {"name": "office-pc", "os": "windows", "type": client}
        });
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/oidc/auth")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        AuthStartResponse {
            code: value["code"].as_str().unwrap().to_string(),
            url: value["url"].as_str().unwrap().to_string(),
        }
    }

    async fn get_uri(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn begin_auth_returns_code_and_provider_url() {
        let app = router(test_state());
        let start = begin_login(&app, "desktop").await;

        assert_eq!(start.code.len(), 43);
        assert!(start.url.contains(&format!("state={}", start.code)));
    }

    #[tokio::test]
    async fn begin_auth_with_unknown_provider_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::post("/api/oidc/auth")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"op":"nope"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_string(response).await.contains("OauthProviderNotFound"));
    }

    #[tokio::test]
    async fn auth_query_before_callback_reports_in_progress() {
        let app = router(test_state());
        let start = begin_login(&app, "desktop").await;

        let response = get_uri(&app, &format!("/api/oidc/auth-query?code={}", start.code)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("No authed oidc is found"));
    }

    #[tokio::test]
    async fn auth_query_for_unknown_code_is_expired() {
        let app = router(test_state());
        let response = get_uri(&app, "/api/oidc/auth-query?code=missing").await;

        assert_eq!(response.status(), StatusCode::GONE);
        assert!(body_string(response).await.contains("OauthExpired"));
    }

    #[tokio::test]
    async fn callback_without_state_renders_failure_page() {
        let app = router(test_state());
        let response = get_uri(&app, "/api/oidc/callback?code=abc").await;

        assert_eq!(response.status(), StatusCode::OK);
        let page = body_string(response).await;
        assert!(page.contains("ParamIsEmpty"));
        assert!(page.contains("Authorization failed"));
    }

    #[tokio::test]
    async fn failed_exchange_burns_the_state() {
        let app = router(test_state());
        let start = begin_login(&app, "desktop").await;

        let first = get_uri(
            &app,
            &format!("/api/oidc/callback?state={}&code=rejected", start.code),
        )
        .await;
        assert!(body_string(first).await.contains("OauthFailed"));

        let second = get_uri(
            &app,
            &format!("/api/oidc/callback?state={}&code=rejected", start.code),
        )
        .await;
        assert!(body_string(second).await.contains("OauthExpired"));
    }

    #[tokio::test]
    async fn provider_error_is_shown_escaped() {
        let app = router(test_state());
        let response = get_uri(
            &app,
            "/api/oidc/callback?state=abc&error=%3Cscript%3Eaccess_denied",
        )
        .await;

        let page = body_string(response).await;
        assert!(page.contains("&lt;script&gt;access_denied"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn escape_html_covers_markup_and_quotes() {
        assert_eq!(
            escape_html(r#"<a href="x" title='y'>&</a>"#),
            "&lt;a href=&quot;x&quot; title=&#39;y&#39;&gt;&amp;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain text"), "plain text");
    }

    #[test]
    fn device_context_is_taken_from_request() {
        let request: OidcAuthRequest = serde_json::from_value(serde_json::json!({
            "op": "corp",
            "id": "123456789",
            "uuid": "uuid-1",
            "device_info": {"name": "office-pc", "os": "linux", "type": "webadmin"}
        }))
        .unwrap();

        let device = request.device();
        assert_eq!(device.device_id, "123456789");
        assert_eq!(device.os, "linux");
        assert!(device.is_web_admin());
    }
}
