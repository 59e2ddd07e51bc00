use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig},
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use security::{
    AppState,
    config::SecurityConfig,
    detector::SuspiciousActivityDetector,
    notifier::{LogNotifier, Notifier, WebhookNotifier},
    repositories::{self, PgActivityLog, UserRepository},
    routes,
    security::SecurityService,
    session::SessionManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting security service");

    let config = SecurityConfig::load()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }
    repositories::migrate(&pool).await?;

    // Initialize Redis connection pool
    let redis_config = RedisConfig::from_env()?;
    let redis_pool = RedisPool::new(&redis_config).await?;

    let sessions = SessionManager::new(Arc::new(redis_pool), config.session_ttl_seconds());
    let activity_log = Arc::new(PgActivityLog::new(pool.clone()));
    let users = Arc::new(UserRepository::new(pool.clone()));
    let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
        Some(url) => {
            info!("New device notifications are sent to {}", url);
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };
    let detector = SuspiciousActivityDetector::new(activity_log.clone(), config.detection_policy());

    let app_state = AppState {
        security: SecurityService::new(
            sessions,
            activity_log,
            users.clone(),
            notifier,
            detector,
        ),
        users,
        db_pool: Some(pool.clone()),
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Security service listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.close().await;
    info!("Security service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
