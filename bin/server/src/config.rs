//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional `config/server` file
//! overlaid by environment variables (`__` separates nested keys, so
//! `OAUTH__PENDING_TTL_SECONDS` sets `oauth.pending_ttl_seconds`).
//!
//! See [`ProviderConfig`] for the per-provider keys under `oauth.providers`.

use fleetdesk_oauth::{FlowSettings, ProviderConfig};
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Redis URL for the pending-auth cache. Without one, pending state is
    /// kept in process memory.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Connection pool settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Bearer token settings.
    #[serde(default)]
    pub token: TokenConfig,

    /// Sign-in and account-linking settings.
    #[serde(default)]
    pub oauth: OauthSettings,
}

fn default_listen_addr() -> String {
    "0.0.0.0:21114".to_string()
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

/// Bearer token configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Lifetime of an issued token in seconds.
    /// Default: 604800 (7 days)
    #[serde(default = "default_token_expire_seconds")]
    pub expire_seconds: i64,
}

fn default_token_expire_seconds() -> i64 {
    7 * 24 * 60 * 60
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expire_seconds: default_token_expire_seconds(),
        }
    }
}

impl TokenConfig {
    #[must_use]
    pub fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expire_seconds)
    }
}

/// OAuth configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OauthSettings {
    /// State lifetimes and the exchange timeout.
    #[serde(flatten)]
    pub flow: FlowSettings,

    /// Group assigned to auto-registered users.
    #[serde(default = "default_group_id")]
    pub default_group_id: i64,

    /// Configured identity providers.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_group_id() -> i64 {
    1
}

impl Default for OauthSettings {
    fn default() -> Self {
        Self {
            flow: FlowSettings::default(),
            default_group_id: default_group_id(),
            providers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `config/server.*` (if present) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config/server").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};
    use fleetdesk_oauth::ProviderKind;

    fn parse(toml: &str) -> ServerConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(r#"database_url = "postgres://localhost/fleetdesk""#);

        assert_eq!(config.database_url, "postgres://localhost/fleetdesk");
        assert!(config.redis_url.is_none());
        assert_eq!(config.listen_addr, "0.0.0.0:21114");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.token.expire_seconds, 604_800);
        assert_eq!(config.oauth.default_group_id, 1);
        assert_eq!(config.oauth.flow.pending_ttl_seconds(), 300);
        assert_eq!(config.oauth.flow.completed_ttl_seconds(), 1800);
        assert!(config.oauth.providers.is_empty());
    }

    #[test]
    fn oauth_section_reads_flow_settings_and_providers() {
        let config = parse(
            r#"
            database_url = "postgres://localhost/fleetdesk"
            redis_url = "redis://127.0.0.1/"

            [oauth]
            pending_ttl_seconds = 120
            completed_ttl_seconds = 0
            exchange_timeout_seconds = 5

            [[oauth.providers]]
            id = "corp"
            issuer_url = "https://sso.example.com"
            client_id = "fleetdesk"
            client_secret = "s3cret"
            redirect_uri = "https://desk.example.com/api/oidc/callback"
            auto_register = true

            [[oauth.providers]]
            id = "google"
            kind = "google"
            "#,
        );

        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(config.oauth.flow.pending_ttl_seconds(), 120);
        assert_eq!(config.oauth.flow.completed_ttl_seconds(), 0);
        assert_eq!(config.oauth.flow.exchange_timeout().as_secs(), 5);

        let corp = &config.oauth.providers[0];
        assert_eq!(corp.id(), "corp");
        assert_eq!(corp.kind(), ProviderKind::Oidc);
        assert!(corp.auto_register());
        assert!(corp.validate().is_ok());

        let google = &config.oauth.providers[1];
        assert_eq!(google.kind(), ProviderKind::Google);
        assert!(!google.auto_register());
        assert!(google.validate().is_err());
    }

    #[test]
    fn token_lifetime_is_in_seconds() {
        let token = TokenConfig { expire_seconds: 90 };
        assert_eq!(token.lifetime(), chrono::Duration::seconds(90));
    }
}
