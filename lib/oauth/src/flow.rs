//! Orchestration of login and bind flows across the provider redirect.
//!
//! A flow is driven by four calls: [`AuthFlowController::begin_auth`] parks a
//! context under a fresh state token, [`AuthFlowController::handle_callback`]
//! completes the provider exchange and resolves the local account,
//! [`AuthFlowController::confirm_pending`] / [`AuthFlowController::confirm_bind`]
//! attach an authenticated user to a parked context, and
//! [`AuthFlowController::poll_result`] hands the result to the client that
//! started the flow.
//!
//! A state token resolves to at most one user. Once a context carries a
//! result it is never re-pointed, and login contexts are deleted when read.

use fleetdesk_core::{Result, UserId};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{CacheError, OauthError};
use crate::gateway::ProviderGateway;
use crate::identity::{ExternalIdentity, UserThirdLink};
use crate::linker::{IdentityLinker, LoginResolution};
use crate::pending::{
    AuthAction, DeviceContext, PendingAuthContext, PendingAuthStore, StateToken,
};
use crate::provider::{ProviderConfig, ProviderRegistry};

/// Lifetimes and timeouts for a flow.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSettings {
    /// How long an unfinished flow stays valid.
    /// Default: 300
    #[serde(default = "default_pending_ttl")]
    pending_ttl_seconds: u64,
    /// How long a resolved result stays pollable. `0` keeps it until read.
    /// Default: 1800
    #[serde(default = "default_completed_ttl")]
    completed_ttl_seconds: u64,
    /// Upper bound on one provider exchange.
    /// Default: 10
    #[serde(default = "default_exchange_timeout")]
    exchange_timeout_seconds: u64,
}

fn default_pending_ttl() -> u64 {
    300
}

fn default_completed_ttl() -> u64 {
    1800
}

fn default_exchange_timeout() -> u64 {
    10
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            pending_ttl_seconds: default_pending_ttl(),
            completed_ttl_seconds: default_completed_ttl(),
            exchange_timeout_seconds: default_exchange_timeout(),
        }
    }
}

impl FlowSettings {
    #[must_use]
    pub fn pending_ttl_seconds(&self) -> u64 {
        self.pending_ttl_seconds
    }

    #[must_use]
    pub fn completed_ttl_seconds(&self) -> u64 {
        self.completed_ttl_seconds
    }

    #[must_use]
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_seconds)
    }

    #[must_use]
    pub fn with_pending_ttl(mut self, seconds: u64) -> Self {
        self.pending_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_completed_ttl(mut self, seconds: u64) -> Self {
        self.completed_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout_seconds = timeout.as_secs();
        self
    }
}

/// Who is starting a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// The authenticated local user, required for bind.
    pub user_id: Option<UserId>,
    /// Device details recorded when a login completes.
    pub device: Option<DeviceContext>,
}

impl CallerContext {
    /// An unauthenticated client, typically a desktop client logging in.
    #[must_use]
    pub fn anonymous(device: Option<DeviceContext>) -> Self {
        Self {
            user_id: None,
            device,
        }
    }

    /// An authenticated user.
    #[must_use]
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            device: None,
        }
    }
}

/// Where the browser goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStart {
    pub state: StateToken,
    pub url: String,
}

/// Result of a completed callback or confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The identity resolved to a local account.
    LoggedIn { user_id: UserId, registered: bool },
    /// The identity was linked to the requesting account.
    Bound { user_id: UserId },
    /// No account matched; the identity is parked under `state` until a
    /// user confirms a bind.
    BindRequired { state: StateToken },
}

/// Drives login and bind flows.
pub struct AuthFlowController {
    providers: ProviderRegistry,
    gateway: Arc<dyn ProviderGateway>,
    store: PendingAuthStore,
    linker: IdentityLinker,
    settings: FlowSettings,
}

impl AuthFlowController {
    #[must_use]
    pub fn new(
        providers: ProviderRegistry,
        gateway: Arc<dyn ProviderGateway>,
        store: PendingAuthStore,
        linker: IdentityLinker,
        settings: FlowSettings,
    ) -> Self {
        Self {
            providers,
            gateway,
            store,
            linker,
            settings,
        }
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Starts a flow and returns the provider URL to send the browser to.
    ///
    /// Bind flows are refused up front when the caller already has a link
    /// for the provider.
    #[instrument(skip(self, caller), fields(user_id = ?caller.user_id))]
    pub async fn begin_auth(
        &self,
        action: AuthAction,
        provider_id: &str,
        caller: CallerContext,
    ) -> Result<AuthStart, OauthError> {
        let provider = self.providers.resolve(provider_id)?;

        let bind_user = match action {
            AuthAction::Login => None,
            AuthAction::Bind => {
                let user_id = caller.user_id.ok_or(OauthError::Unauthenticated)?;
                if self.linker.provider_link(user_id, provider_id).await?.is_some() {
                    return Err(OauthError::ProviderAlreadyBoundForUser {
                        provider: provider_id.to_string(),
                        user_id,
                    }
                    .into());
                }
                Some(user_id)
            }
        };

        let state = StateToken::generate();
        let request = self.gateway.begin_authorization(provider, &state).await?;

        let context = match bind_user {
            Some(user_id) => PendingAuthContext::for_bind(
                provider_id,
                request.pkce_verifier,
                request.nonce,
                user_id,
            ),
            None => PendingAuthContext::for_login(
                provider_id,
                request.pkce_verifier,
                request.nonce,
                caller.device,
            ),
        };

        self.store
            .put(&state, &context, self.settings.pending_ttl_seconds)
            .await
            .map_err(|e| OauthError::Storage {
                details: e.to_string(),
            })?;

        debug!(%action, "authorization started");
        Ok(AuthStart {
            state,
            url: request.url,
        })
    }

    /// Completes the provider exchange for `state` and resolves the account.
    ///
    /// A state is accepted once. Later callbacks, and callbacks after a
    /// failed exchange, report `Expired`.
    #[instrument(skip(self, state, code))]
    pub async fn handle_callback(&self, state: &StateToken, code: &str) -> Result<Outcome, OauthError> {
        let mut context = self.load(state).await?;
        if context.is_settled() {
            debug!("callback for settled state");
            return Err(OauthError::Expired.into());
        }
        let provider = self.providers.resolve(&context.provider_id)?;

        let identity = match self.exchange(provider, code, &context).await {
            Ok(identity) => identity,
            Err(e) => {
                self.discard(state).await;
                return Err(e.into());
            }
        };

        let (outcome, user_id) = match context.action {
            AuthAction::Login => match self.linker.resolve_login(&identity, provider).await {
                Ok(LoginResolution::Existing { user_id }) => (
                    Outcome::LoggedIn {
                        user_id,
                        registered: false,
                    },
                    user_id,
                ),
                Ok(LoginResolution::Registered { user_id }) => (
                    Outcome::LoggedIn {
                        user_id,
                        registered: true,
                    },
                    user_id,
                ),
                Ok(LoginResolution::BindRequired) => {
                    context.identity = Some(identity);
                    self.save(state, &context, self.settings.pending_ttl_seconds)
                        .await?;
                    info!(provider = %provider.id(), "login needs explicit bind");
                    return Ok(Outcome::BindRequired {
                        state: state.clone(),
                    });
                }
                Err(e) => {
                    self.discard(state).await;
                    return Err(e.into());
                }
            },
            AuthAction::Bind => {
                let user_id = context
                    .requesting_user_id
                    .ok_or(OauthError::Unauthenticated)?;
                if let Err(e) = self.linker.bind(user_id, &identity, provider).await {
                    self.discard(state).await;
                    return Err(e.into());
                }
                (Outcome::Bound { user_id }, user_id)
            }
        };

        context.result_user_id = Some(user_id);
        self.save(state, &context, self.settings.completed_ttl_seconds)
            .await?;

        info!(%user_id, provider = %provider.id(), action = %context.action, "authorization completed");
        Ok(outcome)
    }

    /// Attaches an authenticated user to a context, typically one parked by
    /// a bind-required login so the polling client is signed in as them.
    #[instrument(skip(self, state))]
    pub async fn confirm_pending(&self, state: &StateToken, user_id: UserId) -> Result<Outcome, OauthError> {
        let mut context = self.load(state).await?;
        if context.result_user_id.is_some_and(|existing| existing != user_id) {
            warn!("refusing to re-point a resolved state");
            return Err(OauthError::Expired.into());
        }

        context.result_user_id = Some(user_id);
        context.requesting_user_id = Some(user_id);
        self.save(state, &context, self.settings.completed_ttl_seconds)
            .await?;

        Ok(match context.action {
            AuthAction::Login => Outcome::LoggedIn {
                user_id,
                registered: false,
            },
            AuthAction::Bind => Outcome::Bound { user_id },
        })
    }

    /// Links the identity parked under `state` to `user_id` and resolves the
    /// state to that user.
    #[instrument(skip(self, state))]
    pub async fn confirm_bind(&self, state: &StateToken, user_id: UserId) -> Result<Outcome, OauthError> {
        let mut context = self.load(state).await?;
        let Some(identity) = context.identity.clone() else {
            return Err(OauthError::NotReady.into());
        };
        if context.result_user_id.is_some_and(|existing| existing != user_id) {
            warn!("refusing to re-point a resolved state");
            return Err(OauthError::Expired.into());
        }

        let provider = self.providers.get(&context.provider_id)?;
        self.linker.bind(user_id, &identity, provider).await?;

        context.result_user_id = Some(user_id);
        context.requesting_user_id = Some(user_id);
        self.save(state, &context, self.settings.completed_ttl_seconds)
            .await?;

        Ok(Outcome::Bound { user_id })
    }

    /// Returns the resolved context for `state`.
    ///
    /// Login contexts are deleted by this call; bind contexts stay until
    /// they expire.
    #[instrument(skip(self, state))]
    pub async fn poll_result(&self, state: &StateToken) -> Result<PendingAuthContext, OauthError> {
        let context = self.load(state).await?;
        if context.result_user_id.is_none() {
            return Err(OauthError::NotReady.into());
        }

        if context.action == AuthAction::Login {
            self.store.delete(state).await.map_err(|e| {
                warn!(error = %e, "failed to consume state");
                OauthError::Expired
            })?;
        }
        Ok(context)
    }

    /// Read-only view of the context for `state`.
    pub async fn pending_info(&self, state: &StateToken) -> Result<PendingAuthContext, OauthError> {
        self.load(state).await
    }

    /// Removes the user's link for `provider_id`.
    pub async fn unbind(&self, user_id: UserId, provider_id: &str) -> Result<(), OauthError> {
        self.linker.unbind(user_id, provider_id).await?;
        Ok(())
    }

    /// Lists the user's links.
    pub async fn linked_accounts(&self, user_id: UserId) -> Result<Vec<UserThirdLink>, OauthError> {
        Ok(self.linker.linked_accounts(user_id).await?)
    }

    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        context: &PendingAuthContext,
    ) -> std::result::Result<ExternalIdentity, OauthError> {
        let exchange =
            self.gateway
                .exchange(provider, code, &context.pkce_verifier, &context.nonce);
        match tokio::time::timeout(self.settings.exchange_timeout(), exchange).await {
            Ok(result) => result,
            Err(_) => Err(OauthError::ExchangeFailed {
                provider: provider.id().to_string(),
                reason: format!(
                    "timed out after {}s",
                    self.settings.exchange_timeout().as_secs()
                ),
            }),
        }
    }

    async fn load(&self, state: &StateToken) -> Result<PendingAuthContext, OauthError> {
        match self.store.get(state).await {
            Ok(Some(context)) => Ok(context),
            Ok(None) => Err(OauthError::Expired.into()),
            Err(e) => {
                warn!(error = %e, "pending state unavailable");
                Err(OauthError::Expired.into())
            }
        }
    }

    async fn save(
        &self,
        state: &StateToken,
        context: &PendingAuthContext,
        ttl_seconds: u64,
    ) -> Result<(), OauthError> {
        self.store
            .put(state, context, ttl_seconds)
            .await
            .map_err(|e: CacheError| {
                warn!(error = %e, "failed to store pending state");
                OauthError::Expired
            })?;
        Ok(())
    }

    async fn discard(&self, state: &StateToken) {
        if let Err(e) = self.store.delete(state).await {
            warn!(error = %e, "failed to discard pending state");
        }
    }
}
