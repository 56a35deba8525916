//! Application state for route tests.
//!
//! Backed by an in-memory cache and a lazy Postgres pool, so only routes
//! that never reach the database can be exercised.

use async_trait::async_trait;
use fleetdesk_oauth::{
    AuthFlowController, AuthorizationRequest, ExternalIdentity, FlowSettings, IdentityLinker,
    MemoryCache, OauthError, PendingAuthStore, ProcessLock, ProviderConfig, ProviderGateway,
    ProviderKind, ProviderRegistry, StateToken,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AppState;
use crate::config::TokenConfig;
use crate::db::{PgLinkRepository, PgUserRepository, TokenRepository};

/// Gateway that accepts no codes.
pub struct RejectingGateway;

#[async_trait]
impl ProviderGateway for RejectingGateway {
    async fn begin_authorization(
        &self,
        provider: &ProviderConfig,
        state: &StateToken,
    ) -> Result<AuthorizationRequest, OauthError> {
        Ok(AuthorizationRequest {
            url: format!("https://idp.test/{}/authorize?state={state}", provider.id()),
            pkce_verifier: "verifier".to_string(),
            nonce: "nonce".to_string(),
        })
    }

    async fn exchange(
        &self,
        provider: &ProviderConfig,
        _code: &str,
        _pkce_verifier: &str,
        _nonce: &str,
    ) -> Result<ExternalIdentity, OauthError> {
        Err(OauthError::ExchangeFailed {
            provider: provider.id().to_string(),
            reason: "invalid_grant".to_string(),
        })
    }
}

pub fn test_state() -> Arc<AppState> {
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(100))
        .connect_lazy("postgres://fleetdesk@127.0.0.1:1/fleetdesk")
        .unwrap();

    let providers = ProviderRegistry::new([ProviderConfig::builder("corp", ProviderKind::Oidc)
        .issuer_url("https://idp.test/corp")
        .client_id("fleetdesk")
        .client_secret("secret")
        .redirect_uri("https://desk.test/api/oidc/callback")
        .build()]);

    let users = Arc::new(PgUserRepository::new(pool.clone()));
    let links = Arc::new(PgLinkRepository::new(pool.clone()));
    let linker = IdentityLinker::new(users.clone(), links, Arc::new(ProcessLock::new()));
    let flow = AuthFlowController::new(
        providers,
        Arc::new(RejectingGateway),
        PendingAuthStore::new(Arc::new(MemoryCache::new())),
        linker,
        FlowSettings::default(),
    );

    Arc::new(AppState::new(
        flow,
        users,
        TokenRepository::new(pool),
        TokenConfig::default(),
    ))
}
