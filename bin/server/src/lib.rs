//! fleetdesk HTTP server.
//!
//! Hosts the OAuth/OIDC sign-in and account-linking endpoints of the
//! fleetdesk remote-desktop management backend.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;

#[cfg(test)]
mod testing;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::AppState;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(auth::routes::routes())
        .nest("/api/admin/oauth", auth::admin::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
