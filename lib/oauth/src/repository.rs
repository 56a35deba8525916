//! Persistence seams for local accounts and third-party links.

use async_trait::async_trait;
use fleetdesk_core::{ThirdLinkId, UserId};

use crate::error::StorageError;
use crate::identity::{LocalUser, NewLocalUser, NewThirdLink, UserThirdLink};

/// Read and create access to local user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<LocalUser>, StorageError>;

    /// Looks a user up by email, ignoring case.
    async fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>, StorageError>;

    async fn username_exists(&self, username: &str) -> Result<bool, StorageError>;

    /// Creates a user and its first link in one transaction.
    ///
    /// Returns `StorageError::Conflict` naming the violated constraint when
    /// either insert collides; nothing is written in that case.
    async fn create_with_link(
        &self,
        user: &NewLocalUser,
        link: &NewThirdLink,
    ) -> Result<(LocalUser, UserThirdLink), StorageError>;
}

/// Access to third-party links.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn find_by_provider_external_id(
        &self,
        provider_id: &str,
        external_id: &str,
    ) -> Result<Option<UserThirdLink>, StorageError>;

    async fn find_by_user_provider(
        &self,
        user_id: UserId,
        provider_id: &str,
    ) -> Result<Option<UserThirdLink>, StorageError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<UserThirdLink>, StorageError>;

    /// Inserts a link for `user_id`; unique violations surface as `Conflict`.
    async fn create(
        &self,
        user_id: UserId,
        link: &NewThirdLink,
    ) -> Result<UserThirdLink, StorageError>;

    /// Deletes a link, returning whether a row was removed.
    async fn delete(&self, id: ThirdLinkId) -> Result<bool, StorageError>;
}
