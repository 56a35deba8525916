//! OIDC provider gateway using the openidconnect crate.

use async_trait::async_trait;
use base64::Engine;
use fleetdesk_oauth::{
    AuthorizationRequest, ExternalIdentity, OauthError, ProviderConfig, ProviderGateway,
    StateToken,
};
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreProviderMetadata, CoreUserInfoClaims,
};
use openidconnect::{
    AuthorizationCode, ClaimsVerificationError, ClientId, ClientSecret, CsrfToken, IssuerUrl,
    Nonce, OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    TokenResponse,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// How long discovered metadata and signing keys are trusted.
const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(60 * 60);

struct CachedMetadata {
    metadata: CoreProviderMetadata,
    fetched_at: Instant,
}

/// Gateway for OIDC providers.
///
/// Discovery documents (and the signing keys they carry) are cached per
/// provider and re-fetched once stale, or immediately when an ID token's
/// signature matches none of the cached keys.
pub struct OidcGateway {
    http_client: reqwest::Client,
    metadata: RwLock<HashMap<String, CachedMetadata>>,
    metadata_ttl: Duration,
}

impl OidcGateway {
    /// Creates a gateway whose provider requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http_client,
            metadata: RwLock::new(HashMap::new()),
            metadata_ttl: DEFAULT_METADATA_TTL,
        })
    }

    /// Sets how long discovered metadata is reused before re-discovery.
    #[must_use]
    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    /// Returns the provider metadata, discovering it if absent or stale.
    async fn provider_metadata(
        &self,
        provider: &ProviderConfig,
    ) -> Result<CoreProviderMetadata, OauthError> {
        if let Some(cached) = self.metadata.read().await.get(provider.id())
            && cached.fetched_at.elapsed() < self.metadata_ttl
        {
            return Ok(cached.metadata.clone());
        }
        self.discover(provider).await
    }

    /// Fetches the discovery document and signing keys, replacing any cached
    /// copy.
    async fn discover(
        &self,
        provider: &ProviderConfig,
    ) -> Result<CoreProviderMetadata, OauthError> {
        let issuer = provider.issuer_url().unwrap_or_default();
        let issuer_url = IssuerUrl::new(issuer.to_string())
            .map_err(|e| misconfigured(provider, format!("invalid issuer URL: {e}")))?;

        debug!(provider = %provider.id(), issuer, "discovering OIDC provider");
        let metadata = CoreProviderMetadata::discover_async(issuer_url, &self.http_client)
            .await
            .map_err(|e| misconfigured(provider, format!("discovery failed: {e}")))?;

        self.metadata.write().await.insert(
            provider.id().to_string(),
            CachedMetadata {
                metadata: metadata.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(metadata)
    }
}

#[async_trait]
impl ProviderGateway for OidcGateway {
    #[instrument(skip(self, provider, state), fields(provider = %provider.id()))]
    async fn begin_authorization(
        &self,
        provider: &ProviderConfig,
        state: &StateToken,
    ) -> Result<AuthorizationRequest, OauthError> {
        let metadata = self.provider_metadata(provider).await?;
        let redirect_url = redirect_url(provider)?;

        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(provider.client_id().unwrap_or_default().to_string()),
            Some(ClientSecret::new(
                provider.client_secret().unwrap_or_default().to_string(),
            )),
        )
        .set_redirect_uri(redirect_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let csrf = state.as_str().to_string();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                move || CsrfToken::new(csrf),
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        // openid is always requested by the flow itself
        for scope in provider.scopes().into_iter().filter(|s| *s != "openid") {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, _, nonce) = auth_request.url();

        Ok(AuthorizationRequest {
            url: auth_url.to_string(),
            pkce_verifier: pkce_verifier.secret().clone(),
            nonce: nonce.secret().clone(),
        })
    }

    #[instrument(skip_all, fields(provider = %provider.id()))]
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        pkce_verifier: &str,
        nonce: &str,
    ) -> Result<ExternalIdentity, OauthError> {
        let redirect_url = redirect_url(provider)?;
        let build_client = |metadata: CoreProviderMetadata| {
            CoreClient::from_provider_metadata(
                metadata,
                ClientId::new(provider.client_id().unwrap_or_default().to_string()),
                Some(ClientSecret::new(
                    provider.client_secret().unwrap_or_default().to_string(),
                )),
            )
            .set_redirect_uri(redirect_url.clone())
        };
        let client = build_client(self.provider_metadata(provider).await?);

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| exchange_failed(provider, format!("token endpoint error: {e}")))?
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| exchange_failed(provider, format!("token exchange failed: {e}")))?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| exchange_failed(provider, "no ID token in response".to_string()))?;

        let nonce = Nonce::new(nonce.to_string());
        let claims = match id_token.claims(&client.id_token_verifier(), &nonce) {
            Err(ClaimsVerificationError::SignatureVerification(e)) => {
                // The provider may have rotated its keys since discovery.
                debug!(error = %e, "ID token signature rejected, refreshing provider keys");
                let refreshed = build_client(self.discover(provider).await?);
                id_token.claims(&refreshed.id_token_verifier(), &nonce)
            }
            verified => verified,
        }
        .map_err(|e| classify_claims_error(provider, &e))?;

        let mut email = claims.email().map(|e| e.as_str().to_string());
        let username = claims.preferred_username().map(|u| u.as_str().to_string());
        let mut display_name = claims
            .name()
            .and_then(|n| n.get(None))
            .map(|n| n.as_str().to_string());

        if email.is_none() || display_name.is_none() {
            match client.user_info(
                token_response.access_token().clone(),
                Some(claims.subject().clone()),
            ) {
                Ok(request) => {
                    let info: Result<CoreUserInfoClaims, _> =
                        request.request_async(&self.http_client).await;
                    match info {
                        Ok(info) => {
                            email = email.or_else(|| info.email().map(|e| e.as_str().to_string()));
                            display_name = display_name.or_else(|| {
                                info.name()
                                    .and_then(|n| n.get(None))
                                    .map(|n| n.as_str().to_string())
                            });
                        }
                        Err(e) => warn!(error = %e, "user-info request failed"),
                    }
                }
                Err(e) => debug!(error = %e, "provider has no user-info endpoint"),
            }
        }

        let raw = match serde_json::to_value(&token_response) {
            Ok(response) => response
                .get("id_token")
                .and_then(|v| v.as_str())
                .map(decode_jwt_payload)
                .transpose()
                .unwrap_or_else(|e| {
                    warn!(error = %e, "could not decode ID token payload");
                    None
                })
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "could not serialize token response");
                serde_json::Value::Null
            }
        };

        Ok(ExternalIdentity::new(provider.id(), claims.subject().as_str())
            .with_email(email)
            .with_display_name(display_name.or_else(|| username.clone()))
            .with_username(username)
            .with_raw(raw))
    }
}

fn redirect_url(provider: &ProviderConfig) -> Result<RedirectUrl, OauthError> {
    RedirectUrl::new(provider.redirect_uri().unwrap_or_default().to_string())
        .map_err(|e| misconfigured(provider, format!("invalid redirect URI: {e}")))
}

/// Decodes the payload segment of a compact JWT without verifying it.
pub(crate) fn decode_jwt_payload(token: &str) -> Result<serde_json::Value, String> {
    // JWT is base64url(header).base64url(payload).signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("invalid JWT format".to_string());
    }

    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| format!("failed to decode JWT payload: {e}"))?;

    serde_json::from_slice(&payload_bytes).map_err(|e| format!("failed to parse JWT payload: {e}"))
}

/// A nonce failure points at a replayed or intercepted token; everything
/// else is an ordinary failed exchange.
pub(crate) fn classify_claims_error(
    provider: &ProviderConfig,
    error: &ClaimsVerificationError,
) -> OauthError {
    match error {
        ClaimsVerificationError::InvalidNonce(_) => OauthError::NonceMismatch {
            provider: provider.id().to_string(),
        },
        other => exchange_failed(provider, format!("ID token validation failed: {other}")),
    }
}

fn misconfigured(provider: &ProviderConfig, reason: String) -> OauthError {
    OauthError::ProviderMisconfigured {
        provider: provider.id().to_string(),
        reason,
    }
}

fn exchange_failed(provider: &ProviderConfig, reason: String) -> OauthError {
    OauthError::ExchangeFailed {
        provider: provider.id().to_string(),
        reason,
    }
}
