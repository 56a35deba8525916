//! In-flight authorization state, keyed by an opaque state token.
//!
//! A context is created when a flow begins, rewritten once when the provider
//! redirects back, and finally consumed (login) or left to expire (bind).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use fleetdesk_core::UserId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::cache::Cache;
use crate::error::CacheError;
use crate::identity::ExternalIdentity;

const STATE_KEY_PREFIX: &str = "oauth:state:";
const STATE_TOKEN_BYTES: usize = 32;

/// Opaque token correlating a provider redirect with its pending context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateToken(String);

impl StateToken {
    /// Generates a fresh token from 32 random bytes, base64url encoded.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; STATE_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wraps a token received from a client.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn cache_key(&self) -> String {
        format!("{STATE_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the caller wants to do with the external identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthAction {
    /// Sign in, possibly registering a new account.
    Login,
    /// Attach the identity to the requesting account.
    Bind,
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Bind => write!(f, "bind"),
        }
    }
}

/// Client device details captured at begin-auth and recorded at token issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub os: String,
    /// Client type, e.g. `webadmin`, `webclient` or a desktop client.
    #[serde(default)]
    pub client: String,
}

impl DeviceContext {
    /// Returns true for the browser admin console.
    #[must_use]
    pub fn is_web_admin(&self) -> bool {
        self.client == "webadmin"
    }
}

/// Authorization state carried across the provider redirect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAuthContext {
    pub action: AuthAction,
    pub provider_id: String,
    pub pkce_verifier: String,
    pub nonce: String,
    /// Set for bind flows, and for login flows after a confirm.
    #[serde(default)]
    pub requesting_user_id: Option<UserId>,
    #[serde(default)]
    pub device: Option<DeviceContext>,
    /// The local account this flow resolved to.
    #[serde(default)]
    pub result_user_id: Option<UserId>,
    /// External identity parked by a login that needs an explicit bind.
    #[serde(default)]
    pub identity: Option<ExternalIdentity>,
    pub created_at: DateTime<Utc>,
}

impl PendingAuthContext {
    /// Creates the context for a login attempt.
    #[must_use]
    pub fn for_login(
        provider_id: impl Into<String>,
        pkce_verifier: String,
        nonce: String,
        device: Option<DeviceContext>,
    ) -> Self {
        Self {
            action: AuthAction::Login,
            provider_id: provider_id.into(),
            pkce_verifier,
            nonce,
            requesting_user_id: None,
            device,
            result_user_id: None,
            identity: None,
            created_at: Utc::now(),
        }
    }

    /// Creates the context for binding a provider to `user_id`.
    #[must_use]
    pub fn for_bind(
        provider_id: impl Into<String>,
        pkce_verifier: String,
        nonce: String,
        user_id: UserId,
    ) -> Self {
        Self {
            action: AuthAction::Bind,
            provider_id: provider_id.into(),
            pkce_verifier,
            nonce,
            requesting_user_id: Some(user_id),
            device: None,
            result_user_id: None,
            identity: None,
            created_at: Utc::now(),
        }
    }

    /// Returns true once the callback has been handled, successfully or by
    /// parking an identity.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.result_user_id.is_some() || self.identity.is_some()
    }
}

/// Typed view over a [`Cache`] holding pending contexts as JSON.
#[derive(Clone)]
pub struct PendingAuthStore {
    cache: Arc<dyn Cache>,
}

impl PendingAuthStore {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Stores or replaces the context for `state`. A TTL of `0` keeps it
    /// until deleted.
    pub async fn put(
        &self,
        state: &StateToken,
        context: &PendingAuthContext,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_string(context).map_err(|e| CacheError::Encode {
            reason: e.to_string(),
        })?;
        self.cache.set(&state.cache_key(), value, ttl_seconds).await
    }

    /// Loads the context for `state`, if it has not expired.
    pub async fn get(&self, state: &StateToken) -> Result<Option<PendingAuthContext>, CacheError> {
        let key = state.cache_key();
        let Some(value) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&value)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    /// Removes the context for `state`.
    pub async fn delete(&self, state: &StateToken) -> Result<(), CacheError> {
        self.cache.delete(&state.cache_key()).await
    }
}
