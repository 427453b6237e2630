//! Process entrypoint: wires tracing, configuration, the Postgres pool,
//! the provider client, every core component, and the axum router, then
//! serves with graceful shutdown, cancelling every armed playback timer
//! deterministically on the way out.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use venue_vote_core::config::ServerConfig;
use venue_vote_core::coordinator::VotingCoordinator;
use venue_vote_core::hub::EventHub;
use venue_vote_core::lifecycle::EventLifecycle;
use venue_vote_core::playback::{PlaybackCoordinator, TimerRegistry};
use venue_vote_core::provider::HttpMusicProvider;
use venue_vote_core::queue::QueueManager;
use venue_vote_core::repository::{PgRepository, Repository};
use venue_vote_core::routes::{self, AppState};
use venue_vote_core::CoreError;

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    init_logging();

    let config = ServerConfig::from_env()?;
    info!(bind = %config.http_bind, "starting venue-vote-server");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .map_err(|e| CoreError::repository("connect", e))?;

    let repository: Arc<dyn Repository> = Arc::new(PgRepository::new(pool));
    let hub = Arc::new(EventHub::new());
    let lifecycle = Arc::new(EventLifecycle::new(repository.clone()));
    let queue = Arc::new(QueueManager::new(repository.clone()));
    let provider = Arc::new(HttpMusicProvider::new(config.provider.clone()));
    let timers = Arc::new(TimerRegistry::default());
    let playback = Arc::new(PlaybackCoordinator::new(provider, queue.clone(), hub.clone(), timers));
    let coordinator = Arc::new(VotingCoordinator::new(
        lifecycle.clone(),
        queue,
        playback,
        hub.clone(),
        config.admission_defaults,
    ));

    coordinator.spawn_sweeper(std::time::Duration::from_secs(300));

    let state = AppState {
        repository,
        lifecycle,
        coordinator: coordinator.clone(),
        hub,
    };

    let cors = if config.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origin: HeaderValue = config
            .cors_origin
            .parse()
            .map_err(|e| CoreError::Configuration { message: format!("invalid cors_origin: {e}") })?;
        CorsLayer::new().allow_origin(origin).allow_methods(Any).allow_headers(Any)
    };
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(cors)
        .into_make_service_with_connect_info::<std::net::SocketAddr>();

    let listener = tokio::net::TcpListener::bind(config.http_bind)
        .await
        .map_err(|e| CoreError::Configuration { message: format!("bind error: {e}") })?;

    info!(bind = %config.http_bind, "venue-vote-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await
        .map_err(|e| CoreError::Configuration { message: format!("server error: {e}") })?;

    info!("venue-vote-server stopped");
    Ok(())
}

fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "venue_vote_core=info,tower_http=info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Waits for Ctrl+C or SIGTERM, then cancels every armed playback timer
/// before the listener is dropped.
async fn shutdown_signal(coordinator: Arc<VotingCoordinator>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }

    coordinator.shutdown();
}
