//! The provider-facing half of a flow.

use async_trait::async_trait;

use crate::error::OauthError;
use crate::identity::ExternalIdentity;
use crate::pending::StateToken;
use crate::provider::ProviderConfig;

/// What the caller needs to send the browser to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Provider authorization URL carrying state, PKCE challenge and nonce.
    pub url: String,
    /// PKCE verifier to present at exchange time.
    pub pkce_verifier: String,
    /// Nonce the ID token must echo.
    pub nonce: String,
}

/// Authorization-code exchange against one identity provider.
///
/// Implementations never retry; a failed exchange is final for its state.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Builds the authorization URL for `state` with a fresh PKCE verifier
    /// (S256 challenge) and a fresh nonce.
    ///
    /// # Errors
    ///
    /// `ProviderMisconfigured` when the provider cannot be used, including
    /// failed discovery.
    async fn begin_authorization(
        &self,
        provider: &ProviderConfig,
        state: &StateToken,
    ) -> Result<AuthorizationRequest, OauthError>;

    /// Exchanges `code` and verifies the ID token against `nonce`.
    ///
    /// # Errors
    ///
    /// `ExchangeFailed` for a rejected code or transport failure,
    /// `NonceMismatch` when the ID token was issued for another attempt.
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        pkce_verifier: &str,
        nonce: &str,
    ) -> Result<ExternalIdentity, OauthError>;
}
