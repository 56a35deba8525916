//! Error types for the oauth crate.
//!
//! `OauthError` is the taxonomy surfaced to the HTTP layer, reported through
//! rootcause at the controller boundary. Collaborator traits return the
//! narrower `CacheError`, `StorageError` and `LockError`.

use fleetdesk_core::UserId;
use std::fmt;

/// Errors from the sign-in and account-linking flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OauthError {
    /// The requested provider is not configured.
    UnknownProvider { provider: String },
    /// The provider is configured but cannot be used.
    ProviderMisconfigured { provider: String, reason: String },
    /// The state token is unknown, elapsed, or already consumed.
    Expired,
    /// The flow has not produced a result yet.
    NotReady,
    /// The operation needs an authenticated local user.
    Unauthenticated,
    /// Authorization code exchange failed.
    ExchangeFailed { provider: String, reason: String },
    /// The ID token nonce does not match the one issued for this state.
    NonceMismatch { provider: String },
    /// The external identity belongs to another local account.
    AlreadyLinkedToOtherUser { provider: String },
    /// The local account already has a link for this provider.
    ProviderAlreadyBoundForUser { provider: String, user_id: UserId },
    /// Creating a local account from an external identity failed.
    OauthRegisterFailed { reason: String },
    /// A local account referenced by the flow does not exist.
    UserNotFound { user_id: UserId },
    /// The local account has no link for this provider.
    LinkNotFound { provider: String, user_id: UserId },
    /// Persistence failed outside of registration.
    Storage { details: String },
}

impl fmt::Display for OauthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { provider } => {
                write!(f, "oauth provider '{provider}' is not configured")
            }
            Self::ProviderMisconfigured { provider, reason } => {
                write!(f, "oauth provider '{provider}' is misconfigured: {reason}")
            }
            Self::Expired => write!(f, "authorization expired"),
            Self::NotReady => write!(f, "authorization in progress"),
            Self::Unauthenticated => write!(f, "authentication required"),
            Self::ExchangeFailed { provider, reason } => {
                write!(f, "code exchange with '{provider}' failed: {reason}")
            }
            Self::NonceMismatch { provider } => {
                write!(f, "ID token nonce from '{provider}' does not match")
            }
            Self::AlreadyLinkedToOtherUser { provider } => {
                write!(f, "'{provider}' identity is linked to another user")
            }
            Self::ProviderAlreadyBoundForUser { provider, user_id } => {
                write!(f, "user {user_id} already has a '{provider}' link")
            }
            Self::OauthRegisterFailed { reason } => {
                write!(f, "oauth registration failed: {reason}")
            }
            Self::UserNotFound { user_id } => write!(f, "user {user_id} not found"),
            Self::LinkNotFound { provider, user_id } => {
                write!(f, "user {user_id} has no '{provider}' link")
            }
            Self::Storage { details } => write!(f, "storage error: {details}"),
        }
    }
}

impl std::error::Error for OauthError {}

impl OauthError {
    /// Stable message key for the client-side translation tables.
    #[must_use]
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::UnknownProvider { .. } => "OauthProviderNotFound",
            Self::ProviderMisconfigured { .. } => "OauthProviderMisconfigured",
            Self::Expired => "OauthExpired",
            Self::NotReady => "OauthInProgress",
            Self::Unauthenticated => "NeedLogin",
            Self::ExchangeFailed { .. } => "OauthFailed",
            Self::NonceMismatch { .. } => "OauthNonceMismatch",
            Self::AlreadyLinkedToOtherUser { .. } => "OauthHasBindOtherUser",
            Self::ProviderAlreadyBoundForUser { .. } => "OauthHasBeenBound",
            Self::OauthRegisterFailed { .. } => "OauthRegisterFailed",
            Self::UserNotFound { .. } => "UserNotFound",
            Self::LinkNotFound { .. } => "ItemNotFound",
            Self::Storage { .. } => "OperationFailed",
        }
    }

    /// Returns true for failures caused by the server rather than the caller.
    #[must_use]
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::OauthRegisterFailed { .. } | Self::Storage { .. }
        )
    }
}

/// Errors from the pending-auth cache backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The backend could not be reached.
    Unavailable { details: String },
    /// A stored value could not be decoded.
    Corrupt { key: String, reason: String },
    /// A value could not be encoded.
    Encode { reason: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { details } => write!(f, "cache unavailable: {details}"),
            Self::Corrupt { key, reason } => {
                write!(f, "cache entry '{key}' is corrupt: {reason}")
            }
            Self::Encode { reason } => write!(f, "failed to encode cache entry: {reason}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Unique constraints guarding users and third-party links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// `users.username`
    Username,
    /// `user_thirds (op, open_id)`
    ExternalIdentity,
    /// `user_thirds (user_id, op)`
    UserProvider,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::ExternalIdentity => write!(f, "provider external id"),
            Self::UserProvider => write!(f, "user provider"),
        }
    }
}

/// Errors from user and link repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// An insert violated a unique constraint.
    Conflict { constraint: Constraint },
    /// Any other database failure.
    Database { details: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { constraint } => {
                write!(f, "unique constraint violated: {constraint}")
            }
            Self::Database { details } => write!(f, "database error: {details}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Errors from named lock implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock could not be acquired.
    AcquireFailed { name: String, details: String },
    /// The lock could not be released.
    ReleaseFailed { name: String, details: String },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcquireFailed { name, details } => {
                write!(f, "failed to acquire lock '{name}': {details}")
            }
            Self::ReleaseFailed { name, details } => {
                write!(f, "failed to release lock '{name}': {details}")
            }
        }
    }
}

impl std::error::Error for LockError {}
