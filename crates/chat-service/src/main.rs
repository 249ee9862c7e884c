//! Chat Service
//!
//! Entry point for the chat relay: loads configuration, connects to the bus,
//! starts the realtime core and serves HTTP/WebSocket traffic until a
//! shutdown signal or a fatal relay error.

use chat_service::auth::JwtTokenValidator;
use chat_service::bridge::{MessageBus, RedisBus};
use chat_service::config::Config;
use chat_service::errors::ChatError;
use chat_service::observability::{init_metrics_recorder, init_tracing};
use chat_service::routes::{self, AppState};
use chat_service::runtime::ChatRuntime;
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Chat Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        topic_prefix = %config.topic_prefix,
        default_channel = %config.default_channel,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    info!("Connecting to Redis...");
    let bus = RedisBus::connect(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            e
        })?;
    info!("Redis connection established");

    let mut runtime = ChatRuntime::start(Arc::new(bus) as Arc<dyn MessageBus>, &config).await?;

    let state = Arc::new(AppState {
        hub: runtime.hub().clone(),
        bridge: runtime.bridge().clone(),
        validator: Arc::new(JwtTokenValidator::new(
            config.jwt_secret.clone(),
            config.jwt_clock_skew(),
        )),
        session_config: runtime.session_config(),
        max_message_bytes: config.max_message_bytes,
        default_channel: config.default_channel.clone(),
    });

    let app = routes::build_routes(state, runtime.health(), Some(prometheus_handle));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Chat Service listening on {}", addr);

    // The server stops on either an OS signal or a dead relay; which one
    // decides the exit status.
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let fatal: Option<ChatError> = tokio::select! {
        () = shutdown_signal() => None,
        e = runtime.fatal() => Some(e),
    };

    let _ = stop_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }

    runtime.shutdown().await;

    if let Some(e) = fatal {
        error!(error = %e, "Chat Service exiting after fatal relay error");
        return Err(e.into());
    }

    info!("Chat Service shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
