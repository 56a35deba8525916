//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use fleetdesk_core::{ThirdLinkId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Constraint, OauthError, StorageError};
use crate::gateway::{AuthorizationRequest, ProviderGateway};
use crate::identity::{ExternalIdentity, LocalUser, NewLocalUser, NewThirdLink, UserThirdLink};
use crate::pending::StateToken;
use crate::provider::{ProviderConfig, ProviderKind};
use crate::repository::{LinkRepository, UserRepository};

#[derive(Default)]
struct StoreState {
    users: Vec<LocalUser>,
    links: Vec<UserThirdLink>,
    next_id: i64,
    steal_next_registration: Option<UserId>,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_link(&self, user_id: UserId, link: &NewThirdLink) -> Result<(), StorageError> {
        if self
            .links
            .iter()
            .any(|l| l.provider_id == link.provider_id && l.external_id == link.external_id)
        {
            return Err(StorageError::Conflict {
                constraint: Constraint::ExternalIdentity,
            });
        }
        if self
            .links
            .iter()
            .any(|l| l.user_id == user_id && l.provider_id == link.provider_id)
        {
            return Err(StorageError::Conflict {
                constraint: Constraint::UserProvider,
            });
        }
        Ok(())
    }

    fn insert_link(&mut self, user_id: UserId, link: &NewThirdLink) -> UserThirdLink {
        let row = UserThirdLink {
            id: ThirdLinkId::new(self.next_id()),
            user_id,
            provider_id: link.provider_id.clone(),
            provider_kind: link.provider_kind,
            external_id: link.external_id.clone(),
            third_name: link.third_name.clone(),
            third_email: link.third_email.clone(),
            created_at: Utc::now(),
        };
        self.links.push(row.clone());
        row
    }
}

/// Users and links sharing one table set, enforcing the unique indexes.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, username: &str, email: Option<&str>) -> LocalUser {
        let mut state = self.state.lock().unwrap();
        let user = LocalUser {
            id: UserId::new(state.next_id()),
            username: username.to_string(),
            email: email.map(str::to_string),
            nickname: None,
            group_id: 1,
        };
        state.users.push(user.clone());
        user
    }

    pub fn add_link(&self, user_id: UserId, provider_id: &str, external_id: &str) -> UserThirdLink {
        let link = NewThirdLink::from_identity(
            &ExternalIdentity::new(provider_id, external_id),
            ProviderKind::Oidc,
        );
        self.state.lock().unwrap().insert_link(user_id, &link)
    }

    /// Makes the next `create_with_link` lose a race: the identity is linked
    /// to `winner` first and the insert reports an external-identity conflict.
    pub fn steal_next_registration(&self, winner: UserId) {
        self.state.lock().unwrap().steal_next_registration = Some(winner);
    }

    pub fn users(&self) -> Vec<LocalUser> {
        self.state.lock().unwrap().users.clone()
    }

    pub fn links(&self) -> Vec<UserThirdLink> {
        self.state.lock().unwrap().links.clone()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<LocalUser>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|u| {
                u.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().any(|u| u.username == username))
    }

    async fn create_with_link(
        &self,
        user: &NewLocalUser,
        link: &NewThirdLink,
    ) -> Result<(LocalUser, UserThirdLink), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(winner) = state.steal_next_registration.take() {
            state.insert_link(winner, link);
        }
        if state.users.iter().any(|u| u.username == user.username) {
            return Err(StorageError::Conflict {
                constraint: Constraint::Username,
            });
        }
        let id = UserId::new(state.next_id());
        state.check_link(id, link)?;

        let created = LocalUser {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            group_id: user.group_id,
        };
        state.users.push(created.clone());
        let link = state.insert_link(id, link);
        Ok((created, link))
    }
}

#[async_trait]
impl LinkRepository for InMemoryStore {
    async fn find_by_provider_external_id(
        &self,
        provider_id: &str,
        external_id: &str,
    ) -> Result<Option<UserThirdLink>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .links
            .iter()
            .find(|l| l.provider_id == provider_id && l.external_id == external_id)
            .cloned())
    }

    async fn find_by_user_provider(
        &self,
        user_id: UserId,
        provider_id: &str,
    ) -> Result<Option<UserThirdLink>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .links
            .iter()
            .find(|l| l.user_id == user_id && l.provider_id == provider_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<UserThirdLink>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .links
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        user_id: UserId,
        link: &NewThirdLink,
    ) -> Result<UserThirdLink, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.check_link(user_id, link)?;
        Ok(state.insert_link(user_id, link))
    }

    async fn delete(&self, id: ThirdLinkId) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        let before = state.links.len();
        state.links.retain(|l| l.id != id);
        Ok(state.links.len() != before)
    }
}

/// User repository whose email lookup never completes.
pub struct StalledEmailLookup(pub InMemoryStore);

#[async_trait]
impl UserRepository for StalledEmailLookup {
    async fn find_by_id(&self, id: UserId) -> Result<Option<LocalUser>, StorageError> {
        self.0.find_by_id(id).await
    }

    async fn find_by_email(&self, _email: &str) -> Result<Option<LocalUser>, StorageError> {
        std::future::pending().await
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StorageError> {
        self.0.username_exists(username).await
    }

    async fn create_with_link(
        &self,
        user: &NewLocalUser,
        link: &NewThirdLink,
    ) -> Result<(LocalUser, UserThirdLink), StorageError> {
        self.0.create_with_link(user, link).await
    }
}

struct Script {
    identity: ExternalIdentity,
    nonce: Option<String>,
}

/// Gateway answering exchanges from a table of scripted codes.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, Script>>,
    issued: AtomicUsize,
    exchanges: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every exchange, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `code` yields `identity` whatever nonce is presented.
    pub fn script(&self, code: &str, identity: ExternalIdentity) {
        self.scripts.lock().unwrap().insert(
            code.to_string(),
            Script {
                identity,
                nonce: None,
            },
        );
    }

    /// `code` yields `identity` only when presented with `nonce`.
    pub fn script_for_nonce(&self, code: &str, identity: ExternalIdentity, nonce: &str) {
        self.scripts.lock().unwrap().insert(
            code.to_string(),
            Script {
                identity,
                nonce: Some(nonce.to_string()),
            },
        );
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// The nonce handed out by the `n`th authorization, counting from 1.
    pub fn nonce_for(n: usize) -> String {
        format!("nonce-{n}")
    }
}

#[async_trait]
impl ProviderGateway for ScriptedGateway {
    async fn begin_authorization(
        &self,
        provider: &ProviderConfig,
        state: &StateToken,
    ) -> Result<AuthorizationRequest, OauthError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let nonce = Self::nonce_for(n);
        Ok(AuthorizationRequest {
            url: format!(
                "https://idp.test/{}/authorize?state={state}&nonce={nonce}",
                provider.id()
            ),
            pkce_verifier: format!("verifier-{n}"),
            nonce,
        })
    }

    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
        _pkce_verifier: &str,
        nonce: &str,
    ) -> Result<ExternalIdentity, OauthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripts = self.scripts.lock().unwrap();
        let script = scripts.get(code).ok_or_else(|| OauthError::ExchangeFailed {
            provider: provider.id().to_string(),
            reason: "invalid_grant".to_string(),
        })?;
        if script.nonce.as_deref().is_some_and(|expected| expected != nonce) {
            return Err(OauthError::NonceMismatch {
                provider: provider.id().to_string(),
            });
        }
        Ok(script.identity.clone())
    }
}

pub fn provider(id: &str, auto_register: bool) -> ProviderConfig {
    ProviderConfig::builder(id, ProviderKind::Oidc)
        .issuer_url("https://idp.test")
        .client_id("client")
        .client_secret("secret")
        .redirect_uri("https://desk.test/api/oidc/callback")
        .auto_register(auto_register)
        .build()
}
