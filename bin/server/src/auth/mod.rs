//! Authentication module for the fleetdesk server.
//!
//! This module provides:
//! - The public OIDC endpoints used by desktop and web clients to sign in
//! - Admin endpoints for linking and unlinking third-party accounts
//! - The OIDC provider gateway built on `openidconnect`
//! - Bearer token extractors for Axum routes
//!
//! The flow state machine itself lives in `fleetdesk-oauth`; handlers here
//! only translate between HTTP and [`AuthFlowController`].

pub mod admin;
pub mod middleware;
pub mod oidc;
pub mod routes;

use crate::config::TokenConfig;
use crate::db::TokenRepository;
use fleetdesk_oauth::{AuthFlowController, UserRepository};
use std::sync::Arc;

pub use middleware::{ClientIp, RequireAuth};
pub use oidc::OidcGateway;

/// Shared application state.
pub struct AppState {
    /// Sign-in and account-linking flows.
    pub flow: AuthFlowController,
    /// Local users, for building login replies.
    pub users: Arc<dyn UserRepository>,
    /// Bearer tokens and login logs.
    pub tokens: TokenRepository,
    /// Bearer token configuration.
    pub token_config: TokenConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        flow: AuthFlowController,
        users: Arc<dyn UserRepository>,
        tokens: TokenRepository,
        token_config: TokenConfig,
    ) -> Self {
        Self {
            flow,
            users,
            tokens,
            token_config,
        }
    }
}
