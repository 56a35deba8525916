//! Identity provider configuration.
//!
//! Each provider is addressed by a short key (`google`, `corp-sso`, ...)
//! that clients send when starting a flow and that is stored on every link
//! created through it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::OauthError;

/// Google's OIDC issuer, used when a Google provider omits `issuer_url`.
pub const GOOGLE_ISSUER_URL: &str = "https://accounts.google.com";

/// The protocol family of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Generic OpenID Connect provider discovered from its issuer.
    #[default]
    Oidc,
    /// Google accounts.
    Google,
}

impl ProviderKind {
    /// Returns the stored representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oidc => "oidc",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oidc" => Ok(Self::Oidc),
            "google" => Ok(Self::Google),
            other => Err(format!("unknown provider kind '{other}'")),
        }
    }
}

/// Configuration for one identity provider.
///
/// Credentials are optional at load time so that a half-configured provider
/// is reported as misconfigured when used rather than failing startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider key sent by clients and stored on links.
    id: String,
    /// Protocol family.
    #[serde(default)]
    kind: ProviderKind,
    /// The OIDC issuer URL used for discovery.
    #[serde(default)]
    issuer_url: Option<String>,
    /// The OAuth2 client ID registered with the provider.
    #[serde(default)]
    client_id: Option<String>,
    /// The OAuth2 client secret.
    #[serde(default)]
    client_secret: Option<String>,
    /// The callback URL registered with the provider.
    #[serde(default)]
    redirect_uri: Option<String>,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// Whether a first-seen identity may create a local account.
    #[serde(default)]
    auto_register: bool,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

impl ProviderConfig {
    /// Creates a fully specified provider with default scopes and
    /// auto-registration disabled.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: ProviderKind,
        issuer_url: Option<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            issuer_url,
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            redirect_uri: Some(redirect_uri.into()),
            scopes: default_scopes(),
            auto_register: false,
        }
    }

    /// Creates a builder; every credential starts unset.
    #[must_use]
    pub fn builder(id: impl Into<String>, kind: ProviderKind) -> ProviderConfigBuilder {
        ProviderConfigBuilder::new(id, kind)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Returns the issuer URL, defaulting to Google's for Google providers.
    #[must_use]
    pub fn issuer_url(&self) -> Option<&str> {
        match (self.issuer_url.as_deref(), self.kind) {
            (Some(url), _) => Some(url),
            (None, ProviderKind::Google) => Some(GOOGLE_ISSUER_URL),
            (None, ProviderKind::Oidc) => None,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    #[must_use]
    pub fn auto_register(&self) -> bool {
        self.auto_register
    }

    /// Checks that every field needed for a code exchange is present.
    ///
    /// # Errors
    ///
    /// Returns `ProviderMisconfigured` naming the missing fields.
    pub fn validate(&self) -> Result<(), OauthError> {
        let missing: Vec<&str> = [
            ("issuer_url", self.issuer_url()),
            ("client_id", self.client_id()),
            ("client_secret", self.client_secret()),
            ("redirect_uri", self.redirect_uri()),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(OauthError::ProviderMisconfigured {
                provider: self.id.clone(),
                reason: format!("missing {}", missing.join(", ")),
            })
        }
    }
}

/// Builder for `ProviderConfig`.
#[derive(Debug)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            config: ProviderConfig {
                id: id.into(),
                kind,
                issuer_url: None,
                client_id: None,
                client_secret: None,
                redirect_uri: None,
                scopes: default_scopes(),
                auto_register: false,
            },
        }
    }

    #[must_use]
    pub fn issuer_url(mut self, url: impl Into<String>) -> Self {
        self.config.issuer_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.redirect_uri = Some(uri.into());
        self
    }

    /// Adds a scope unless it is already requested.
    #[must_use]
    pub fn add_scope(mut self, scope: &str) -> Self {
        if !self.config.scopes().contains(&scope) {
            self.config.scopes = format!("{},{scope}", self.config.scopes);
        }
        self
    }

    #[must_use]
    pub fn auto_register(mut self, enabled: bool) -> Self {
        self.config.auto_register = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> ProviderConfig {
        self.config
    }
}

/// All configured providers, keyed by provider id.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Builds a registry; a later duplicate id replaces an earlier one.
    #[must_use]
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }

    /// Looks up a provider without validating it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if no provider has this id.
    pub fn get(&self, provider_id: &str) -> Result<&ProviderConfig, OauthError> {
        self.providers
            .get(provider_id)
            .ok_or_else(|| OauthError::UnknownProvider {
                provider: provider_id.to_string(),
            })
    }

    /// Looks up a provider and checks it is usable.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` or `ProviderMisconfigured`.
    pub fn resolve(&self, provider_id: &str) -> Result<&ProviderConfig, OauthError> {
        let provider = self.get(provider_id)?;
        provider.validate()?;
        Ok(provider)
    }

    /// Returns the configured provider ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
