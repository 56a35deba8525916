//! OAuth/OIDC sign-in and third-party account linking.
//!
//! This crate carries a login or bind attempt across the redirect to an
//! identity provider and back, and reconciles the resulting external identity
//! with a local account.
//!
//! # Components
//!
//! - [`PendingAuthStore`]: typed view over a TTL [`Cache`] holding in-flight
//!   state, keyed by an opaque [`StateToken`]
//! - [`ProviderGateway`]: code exchange against one provider, yielding an
//!   [`ExternalIdentity`]
//! - [`IdentityLinker`]: login, auto-registration and bind rules
//! - [`AuthFlowController`]: the entry points used by the HTTP layer
//!
//! Storage, locking and the provider HTTP client are injected through traits
//! so that several server instances can share one cache and database.

pub mod cache;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod identity;
pub mod linker;
pub mod lock;
pub mod pending;
pub mod provider;
pub mod repository;

#[cfg(test)]
mod testing;

pub use cache::{Cache, MemoryCache};
pub use error::{CacheError, Constraint, LockError, OauthError, StorageError};
pub use flow::{AuthFlowController, AuthStart, CallerContext, FlowSettings, Outcome};
pub use gateway::{AuthorizationRequest, ProviderGateway};
pub use identity::{ExternalIdentity, LocalUser, NewLocalUser, NewThirdLink, UserThirdLink};
pub use linker::{IdentityLinker, LoginResolution, REGISTER_LOCK_NAME, format_username};
pub use lock::{HeldLock, LockGuard, NamedLock, ProcessLock};
pub use pending::{AuthAction, DeviceContext, PendingAuthContext, PendingAuthStore, StateToken};
pub use provider::{ProviderConfig, ProviderConfigBuilder, ProviderKind, ProviderRegistry};
pub use repository::{LinkRepository, UserRepository};
