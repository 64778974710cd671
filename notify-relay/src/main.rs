use std::sync::Arc;

use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use notify_relay::api::jwt::JwtService;
use notify_relay::api::{ApiServer, AppState};
use notify_relay::config::RelayConfig;
use notify_relay::database::{self, repositories::SqlxNotificationRepository};
use notify_relay::logging;
use notify_relay::notification::{ConnectionRegistry, EventPublisher};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env_or_default();
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backpressure = %config.delivery.backpressure,
        queue_capacity = config.delivery.queue_capacity,
        "Starting notify-relay"
    );

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.child_token());

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let repository = Arc::new(SqlxNotificationRepository::new(pool.clone()));
    let registry = Arc::new(ConnectionRegistry::from_config(&config.delivery));
    let reaper = registry.spawn_reaper(
        config.delivery.heartbeat_interval,
        config.delivery.heartbeat_timeout,
        shutdown.child_token(),
    );
    let publisher = EventPublisher::new(repository.clone(), registry.clone());

    let mut state = AppState::new(registry)
        .with_notification_repository(repository)
        .with_publisher(publisher)
        .with_delivery_config(config.delivery.clone())
        .with_logging_config(logging_config);
    match JwtService::from_env() {
        Some(jwt) => state = state.with_jwt_service(Arc::new(jwt)),
        None => warn!("JWT_SECRET is not set; notification routes will reject every request"),
    }

    let server = Arc::new(ApiServer::new(config.api.clone(), state));
    let mut server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    let server_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            server.shutdown();
            server_task.await
        }
        result = &mut server_task => result,
    };
    shutdown.cancel();

    match server_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("API server exited with error: {}", e),
        Err(e) => warn!("API server task failed: {}", e),
    }
    let _ = reaper.await;
    pool.close().await;

    info!("notify-relay stopped");
    Ok(())
}
