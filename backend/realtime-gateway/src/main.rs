use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use realtime_gateway::{
    bridge::PubSubBridge, config::Config, error::AppError, heartbeat::HeartbeatMonitor, logging,
    registry::ConnectionRegistry, routes, state::AppState,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let registry = ConnectionRegistry::new(cfg.queue_capacity);

    let bridge = Arc::new(PubSubBridge::new(
        &cfg.redis_url,
        registry.clone(),
        cfg.backoff.clone(),
    )?);
    bridge.start().await;

    let mut heartbeat = HeartbeatMonitor::new(
        registry.clone(),
        cfg.heartbeat.interval,
        cfg.heartbeat.idle_threshold,
    );
    heartbeat.start();

    let state = AppState {
        registry: registry.clone(),
        bridge: bridge.clone(),
        config: cfg.clone(),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting realtime-gateway");

    // Bind failure is the only fatal error in this service
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .keep_alive(Duration::from_secs(75))
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(e.to_string()))?;

    // Ordered teardown: stop the sweeper, say goodbye to clients, then drop
    // the backbone connections.
    heartbeat.stop();
    registry.shutdown().await;
    bridge.cleanup().await;
    tracing::info!("realtime-gateway stopped");
    Ok(())
}
