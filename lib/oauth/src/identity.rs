//! Identity records exchanged between the gateway, the linker and storage.
//!
//! `ExternalIdentity` is the normalized output of a provider exchange.
//! `LocalUser` belongs to the user-management subsystem and is only read or
//! created here. `UserThirdLink` ties the two together and is owned by the
//! linker.

use chrono::{DateTime, Utc};
use fleetdesk_core::{ThirdLinkId, UserId};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// A third-party identity after a successful code exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// The configured provider key.
    pub provider_id: String,
    /// The provider's subject identifier.
    pub external_id: String,
    /// Email address, lowercased. `None` when the provider sent none.
    pub email: Option<String>,
    /// Human-readable name (`name` claim, falling back to `preferred_username`).
    pub display_name: Option<String>,
    /// Login handle at the provider (`preferred_username` claim).
    pub username: Option<String>,
    /// Decoded provider payload, kept for audit.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl ExternalIdentity {
    /// Creates an identity with only the required fields set.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            external_id: external_id.into(),
            email: None,
            display_name: None,
            username: None,
            raw: serde_json::Value::Null,
        }
    }

    /// Sets the email, trimming and lowercasing it. Blank addresses become `None`.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    /// Sets the provider-side username.
    #[must_use]
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Attaches the raw provider payload.
    #[must_use]
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    /// The name a new local account is derived from.
    #[must_use]
    pub fn preferred_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.display_name.as_deref())
            .unwrap_or_default()
    }
}

/// A local user account as seen by the linker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub group_id: i64,
}

/// Insert shape for a local user created by auto-registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLocalUser {
    pub username: String,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub group_id: i64,
}

/// A stored link between a local user and a third-party identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserThirdLink {
    pub id: ThirdLinkId,
    pub user_id: UserId,
    pub provider_id: String,
    pub provider_kind: ProviderKind,
    pub external_id: String,
    pub third_name: Option<String>,
    pub third_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a third-party link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThirdLink {
    pub provider_id: String,
    pub provider_kind: ProviderKind,
    pub external_id: String,
    pub third_name: Option<String>,
    pub third_email: Option<String>,
}

impl NewThirdLink {
    /// Builds the link row for an external identity.
    #[must_use]
    pub fn from_identity(identity: &ExternalIdentity, kind: ProviderKind) -> Self {
        Self {
            provider_id: identity.provider_id.clone(),
            provider_kind: kind,
            external_id: identity.external_id.clone(),
            third_name: identity.display_name.clone(),
            third_email: identity.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_lowercased_and_trimmed() {
        let identity =
            ExternalIdentity::new("google", "sub-1").with_email(Some(" Alice@Example.COM ".into()));
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn blank_email_becomes_none() {
        let identity = ExternalIdentity::new("google", "sub-1").with_email(Some("  ".into()));
        assert!(identity.email.is_none());
    }

    #[test]
    fn preferred_name_falls_back_to_display_name() {
        let identity = ExternalIdentity::new("google", "sub-1")
            .with_display_name(Some("Alice Smith".to_string()));
        assert_eq!(identity.preferred_name(), "Alice Smith");

        let identity = identity.with_username(Some("alice".to_string()));
        assert_eq!(identity.preferred_name(), "alice");
    }

    #[test]
    fn link_row_copies_identity_fields() {
        let identity = ExternalIdentity::new("corp", "abc")
            .with_email(Some("a@x.com".to_string()))
            .with_display_name(Some("A".to_string()));
        let link = NewThirdLink::from_identity(&identity, ProviderKind::Oidc);

        assert_eq!(link.provider_id, "corp");
        assert_eq!(link.external_id, "abc");
        assert_eq!(link.third_email.as_deref(), Some("a@x.com"));
        assert_eq!(link.third_name.as_deref(), Some("A"));
    }
}
