//! Reconciles external identities with local accounts.
//!
//! Links are only ever created here. Two guards keep them consistent under
//! concurrency: registration runs under the `register_by_oauth` named lock,
//! and the link table carries unique indexes on `(provider, external id)`
//! and `(user, provider)` whose violations are mapped back to business
//! errors.

use fleetdesk_core::UserId;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{Constraint, OauthError, StorageError};
use crate::identity::{ExternalIdentity, NewLocalUser, NewThirdLink, UserThirdLink};
use crate::lock::NamedLock;
use crate::provider::ProviderConfig;
use crate::repository::{LinkRepository, UserRepository};

/// Lock serializing auto-registration across the deployment.
pub const REGISTER_LOCK_NAME: &str = "register_by_oauth";

const MAX_USERNAME_ATTEMPTS: usize = 16;
const FALLBACK_USERNAME: &str = "user";
const DEFAULT_GROUP_ID: i64 = 1;

/// How a login callback maps onto a local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginResolution {
    /// The identity belongs to an existing account.
    Existing { user_id: UserId },
    /// A new account was created for the identity.
    Registered { user_id: UserId },
    /// No account matched and auto-registration is off.
    BindRequired,
}

/// Decides login, registration and binding for external identities.
pub struct IdentityLinker {
    users: Arc<dyn UserRepository>,
    links: Arc<dyn LinkRepository>,
    lock: Arc<dyn NamedLock>,
    default_group_id: i64,
}

impl IdentityLinker {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        links: Arc<dyn LinkRepository>,
        lock: Arc<dyn NamedLock>,
    ) -> Self {
        Self {
            users,
            links,
            lock,
            default_group_id: DEFAULT_GROUP_ID,
        }
    }

    /// Sets the group assigned to auto-registered accounts.
    #[must_use]
    pub fn with_default_group(mut self, group_id: i64) -> Self {
        self.default_group_id = group_id;
        self
    }

    /// Resolves a login callback to a local account.
    #[instrument(skip(self, identity, provider), fields(provider = %provider.id()))]
    pub async fn resolve_login(
        &self,
        identity: &ExternalIdentity,
        provider: &ProviderConfig,
    ) -> Result<LoginResolution, OauthError> {
        if let Some(link) = self
            .links
            .find_by_provider_external_id(&identity.provider_id, &identity.external_id)
            .await
            .map_err(storage)?
        {
            let user_id = self.existing_user(&link).await?;
            debug!(%user_id, "identity already linked");
            return Ok(LoginResolution::Existing { user_id });
        }

        if !provider.auto_register() {
            debug!("no link and auto-register disabled");
            return Ok(LoginResolution::BindRequired);
        }

        let guard = self
            .lock
            .acquire(REGISTER_LOCK_NAME)
            .await
            .map_err(|e| OauthError::OauthRegisterFailed {
                reason: e.to_string(),
            })?;
        let result = self.register(identity, provider).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "failed to release registration lock");
        }
        result
    }

    /// Links `identity` to `user_id`.
    ///
    /// Binding an identity that is already linked to the same user succeeds
    /// without writing.
    #[instrument(skip(self, identity, provider), fields(provider = %provider.id()))]
    pub async fn bind(
        &self,
        user_id: UserId,
        identity: &ExternalIdentity,
        provider: &ProviderConfig,
    ) -> Result<UserThirdLink, OauthError> {
        if self
            .users
            .find_by_id(user_id)
            .await
            .map_err(storage)?
            .is_none()
        {
            return Err(OauthError::UserNotFound { user_id });
        }

        if let Some(link) = self
            .links
            .find_by_provider_external_id(&identity.provider_id, &identity.external_id)
            .await
            .map_err(storage)?
        {
            if link.user_id == user_id {
                debug!("identity already bound to this user");
                return Ok(link);
            }
            return Err(OauthError::AlreadyLinkedToOtherUser {
                provider: identity.provider_id.clone(),
            });
        }

        if self
            .links
            .find_by_user_provider(user_id, &identity.provider_id)
            .await
            .map_err(storage)?
            .is_some()
        {
            return Err(OauthError::ProviderAlreadyBoundForUser {
                provider: identity.provider_id.clone(),
                user_id,
            });
        }

        let new_link = NewThirdLink::from_identity(identity, provider.kind());
        match self.links.create(user_id, &new_link).await {
            Ok(link) => {
                info!(target: "audit", %user_id, provider = %link.provider_id, "third-party account bound");
                Ok(link)
            }
            Err(StorageError::Conflict {
                constraint: Constraint::ExternalIdentity,
            }) => self.reread_bind_winner(user_id, identity).await,
            Err(StorageError::Conflict { .. }) => Err(OauthError::ProviderAlreadyBoundForUser {
                provider: identity.provider_id.clone(),
                user_id,
            }),
            Err(e) => Err(storage(e)),
        }
    }

    /// Removes the user's link for `provider_id`.
    #[instrument(skip(self))]
    pub async fn unbind(&self, user_id: UserId, provider_id: &str) -> Result<(), OauthError> {
        let link = self
            .links
            .find_by_user_provider(user_id, provider_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| OauthError::LinkNotFound {
                provider: provider_id.to_string(),
                user_id,
            })?;
        if !self.links.delete(link.id).await.map_err(storage)? {
            return Err(OauthError::LinkNotFound {
                provider: provider_id.to_string(),
                user_id,
            });
        }
        info!(target: "audit", %user_id, provider = provider_id, "third-party account unbound");
        Ok(())
    }

    /// Lists every link held by `user_id`.
    pub async fn linked_accounts(&self, user_id: UserId) -> Result<Vec<UserThirdLink>, OauthError> {
        self.links.list_for_user(user_id).await.map_err(storage)
    }

    /// Returns the user's link for `provider_id`, if any.
    pub async fn provider_link(
        &self,
        user_id: UserId,
        provider_id: &str,
    ) -> Result<Option<UserThirdLink>, OauthError> {
        self.links
            .find_by_user_provider(user_id, provider_id)
            .await
            .map_err(storage)
    }

    async fn existing_user(&self, link: &UserThirdLink) -> Result<UserId, OauthError> {
        match self.users.find_by_id(link.user_id).await.map_err(storage)? {
            Some(user) => Ok(user.id),
            None => Err(OauthError::UserNotFound {
                user_id: link.user_id,
            }),
        }
    }

    /// Registration body; the caller holds the registration lock.
    async fn register(
        &self,
        identity: &ExternalIdentity,
        provider: &ProviderConfig,
    ) -> Result<LoginResolution, OauthError> {
        if let Some(link) = self
            .links
            .find_by_provider_external_id(&identity.provider_id, &identity.external_id)
            .await
            .map_err(register_failed)?
        {
            let user_id = self.existing_user(&link).await?;
            return Ok(LoginResolution::Existing { user_id });
        }

        let new_link = NewThirdLink::from_identity(identity, provider.kind());

        if let Some(email) = identity.email.as_deref() {
            if let Some(user) = self.users.find_by_email(email).await.map_err(register_failed)? {
                return match self.links.create(user.id, &new_link).await {
                    Ok(_) => {
                        info!(target: "audit", user_id = %user.id, provider = %provider.id(), "identity linked by email");
                        Ok(LoginResolution::Existing { user_id: user.id })
                    }
                    Err(StorageError::Conflict {
                        constraint: Constraint::ExternalIdentity,
                    }) => self.reread_login_winner(identity).await,
                    Err(StorageError::Conflict { .. }) => {
                        Err(OauthError::ProviderAlreadyBoundForUser {
                            provider: provider.id().to_string(),
                            user_id: user.id,
                        })
                    }
                    Err(e) => Err(register_failed(e)),
                };
            }
        }

        let mut username = format_username(identity.preferred_name());
        for _ in 0..MAX_USERNAME_ATTEMPTS {
            if self
                .users
                .username_exists(&username)
                .await
                .map_err(register_failed)?
            {
                push_random_digit(&mut username);
                continue;
            }

            let new_user = NewLocalUser {
                username: username.clone(),
                email: identity.email.clone(),
                nickname: identity.display_name.clone(),
                group_id: self.default_group_id,
            };
            match self.users.create_with_link(&new_user, &new_link).await {
                Ok((user, _)) => {
                    info!(target: "audit", user_id = %user.id, username = %user.username, provider = %provider.id(), "user registered by oauth");
                    return Ok(LoginResolution::Registered { user_id: user.id });
                }
                Err(StorageError::Conflict {
                    constraint: Constraint::Username,
                }) => push_random_digit(&mut username),
                Err(StorageError::Conflict {
                    constraint: Constraint::ExternalIdentity,
                }) => return self.reread_login_winner(identity).await,
                Err(e) => return Err(register_failed(e)),
            }
        }

        Err(OauthError::OauthRegisterFailed {
            reason: format!("no free username derived from '{}'", identity.preferred_name()),
        })
    }

    async fn reread_login_winner(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<LoginResolution, OauthError> {
        let link = self
            .links
            .find_by_provider_external_id(&identity.provider_id, &identity.external_id)
            .await
            .map_err(register_failed)?
            .ok_or_else(|| OauthError::OauthRegisterFailed {
                reason: "conflicting link disappeared".to_string(),
            })?;
        debug!(user_id = %link.user_id, "lost registration race, using winner");
        let user_id = self.existing_user(&link).await?;
        Ok(LoginResolution::Existing { user_id })
    }

    async fn reread_bind_winner(
        &self,
        user_id: UserId,
        identity: &ExternalIdentity,
    ) -> Result<UserThirdLink, OauthError> {
        match self
            .links
            .find_by_provider_external_id(&identity.provider_id, &identity.external_id)
            .await
            .map_err(storage)?
        {
            Some(link) if link.user_id == user_id => Ok(link),
            _ => Err(OauthError::AlreadyLinkedToOtherUser {
                provider: identity.provider_id.clone(),
            }),
        }
    }
}

/// Derives a username: spaces removed, lowercased, `user` when empty.
#[must_use]
pub fn format_username(name: &str) -> String {
    let username: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    if username.is_empty() {
        FALLBACK_USERNAME.to_string()
    } else {
        username
    }
}

fn push_random_digit(username: &mut String) {
    let digit = rand::thread_rng().gen_range(0..10u32);
    username.push(char::from_digit(digit, 10).unwrap_or('0'));
}

fn storage(e: StorageError) -> OauthError {
    OauthError::Storage {
        details: e.to_string(),
    }
}

fn register_failed(e: StorageError) -> OauthError {
    OauthError::OauthRegisterFailed {
        reason: e.to_string(),
    }
}
