use fleetdesk_oauth::{
    AuthFlowController, Cache, IdentityLinker, MemoryCache, PendingAuthStore, ProviderRegistry,
};
use fleetdesk_server::{
    auth::{AppState, OidcGateway},
    cache::RedisCache,
    config::ServerConfig,
    db::{PgAdvisoryLock, PgLinkRepository, PgUserRepository, TokenRepository},
    router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from file and environment
    let config = ServerConfig::load().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    // Cleanup expired tokens on startup
    let tokens = TokenRepository::new(db_pool.clone());
    match tokens.delete_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(deleted_tokens = count, "Cleaned up expired tokens on startup");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup expired tokens on startup");
        }
    }

    // Pending-auth cache: Redis when configured, process memory otherwise
    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis for pending-auth state");
            Arc::new(
                RedisCache::connect(url)
                    .await
                    .expect("failed to connect to redis"),
            )
        }
        None => {
            tracing::info!("Keeping pending-auth state in memory");
            Arc::new(MemoryCache::new())
        }
    };

    let providers = ProviderRegistry::new(config.oauth.providers.clone());
    if providers.is_empty() {
        tracing::warn!("No OAuth providers configured");
    }
    for id in providers.ids() {
        if let Ok(provider) = providers.get(id)
            && let Err(e) = provider.validate()
        {
            tracing::warn!(provider = id, error = %e, "OAuth provider unusable");
        }
    }

    let gateway = OidcGateway::new(config.oauth.flow.exchange_timeout())
        .expect("failed to build OIDC HTTP client");

    let users = Arc::new(PgUserRepository::new(db_pool.clone()));
    let linker = IdentityLinker::new(
        users.clone(),
        Arc::new(PgLinkRepository::new(db_pool.clone())),
        Arc::new(PgAdvisoryLock::new(db_pool.clone())),
    )
    .with_default_group(config.oauth.default_group_id);

    let flow = AuthFlowController::new(
        providers,
        Arc::new(gateway),
        PendingAuthStore::new(cache),
        linker,
        config.oauth.flow.clone(),
    );

    let app_state = Arc::new(AppState::new(flow, users, tokens, config.token.clone()));
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
