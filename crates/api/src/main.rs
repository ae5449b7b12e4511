use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jobline_core::collaborators::PushDispatcher;
use jobline_core::geo::StraightLineEstimator;
use jobline_events::{PushFallback, TracingPushDispatcher, WebhookPushDispatcher};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobline_api::auth::jwt::JwtIdentityVerifier;
use jobline_api::config::ServerConfig;
use jobline_api::realtime::{Collaborators, RealtimeHub};
use jobline_api::router::build_app_router;
use jobline_api::state::AppState;
use jobline_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "jobline_api=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = jobline_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    jobline_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    jobline_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Push fallback ---
    let dispatcher: Arc<dyn PushDispatcher> = match &config.push_webhook_url {
        Some(url) => {
            let webhook = WebhookPushDispatcher::new(url.clone())
                .unwrap_or_else(|e| panic!("Invalid PUSH_WEBHOOK_URL: {e}"));
            tracing::info!(url = %webhook.url(), "Push notifications via webhook");
            Arc::new(webhook)
        }
        None => {
            tracing::warn!("PUSH_WEBHOOK_URL not set, push notifications are only logged");
            Arc::new(TracingPushDispatcher)
        }
    };
    let push_cancel = CancellationToken::new();
    let (push, push_handle) = PushFallback::spawn(
        dispatcher,
        config.realtime.push_queue_capacity,
        push_cancel.clone(),
    );

    // --- Real-time hub ---
    let store = Arc::new(jobline_db::PgStore::new(pool.clone()));
    let collaborators = Collaborators {
        identity: Arc::new(JwtIdentityVerifier::new(config.jwt.clone())),
        jobs: store.clone(),
        statuses: store.clone(),
        messages: store.clone(),
        eta: Arc::new(StraightLineEstimator::new(config.realtime.average_speed_mps)),
        location_history: Some(store),
    };
    let hub = Arc::new(RealtimeHub::new(
        collaborators,
        push,
        config.realtime.clone(),
    ));

    // --- Heartbeat ---
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&hub), heartbeat_cancel.clone());

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        hub: Arc::clone(&hub),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let shutdown_hub = Arc::clone(&hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Close sessions first so open WebSocket upgrades let the
            // server finish draining.
            shutdown_hub.shutdown().await;
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    heartbeat_cancel.cancel();
    let _ = tokio::time::timeout(drain, heartbeat_handle).await;
    tracing::info!("Heartbeat task stopped");

    let session_count = hub.sessions().connection_count().await;
    if session_count > 0 {
        tracing::info!(session_count, "Closing remaining sessions");
        hub.shutdown().await;
    }

    push_cancel.cancel();
    let _ = tokio::time::timeout(drain, push_handle).await;
    tracing::info!("Push fallback worker stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
