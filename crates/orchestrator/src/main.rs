//! Labdesk Orchestrator Server
//!
//! An async Rust server that drives ML research workflows: a durable
//! state machine over PostgreSQL with a lease-based task queue, human
//! approval gates, and an append-only event log.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labdesk_orchestrator::{
    clients::{HttpClusterClient, HttpPlannerClient, HttpReporterClient},
    config::{AppConfig, DatabaseConfig},
    db::{create_pool, ensure_schema},
    engine::{steps, GateManager, Runner, TaskQueue},
    handlers,
    services::{EventService, GateService, WorkflowService},
    state::AppState,
};

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,labdesk_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router with all routes.
fn build_router(
    state: AppState,
    workflow_service: WorkflowService,
    event_service: EventService,
    gate_service: GateService,
) -> Router {
    // CORS configuration - allow all origins for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Health check routes
    let health_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/health", get(handlers::health::api_health))
        .with_state(state);

    // Workflow lifecycle routes
    let workflow_routes = Router::new()
        .route("/api/workflows", post(handlers::workflows::create))
        .route("/api/workflows", get(handlers::workflows::list))
        .route("/api/workflows/{id}", get(handlers::workflows::get))
        .route(
            "/api/workflows/{id}/cancel",
            post(handlers::workflows::cancel),
        )
        .route(
            "/api/workflows/{id}/resume",
            post(handlers::workflows::resume),
        )
        .with_state(workflow_service);

    // Event log routes
    let event_routes = Router::new()
        .route("/api/workflows/{id}/events", get(handlers::events::list))
        .with_state(event_service);

    // Human gate routes
    let gate_routes = Router::new()
        .route("/api/workflows/{id}/gates", get(handlers::gates::list))
        .route(
            "/api/workflows/{id}/gates/{gate_id}/resolve",
            post(handlers::gates::resolve),
        )
        .with_state(gate_service);

    Router::new()
        .merge(health_routes)
        .merge(workflow_routes)
        .merge(event_routes)
        .merge(gate_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Labdesk Orchestrator"
    );

    let app_config = AppConfig::from_env()?;
    let db_config = DatabaseConfig::from_env()?;

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        worker_id = %app_config.worker_id,
        worker_slots = app_config.worker_slots,
        debug = app_config.debug,
        "Configuration loaded"
    );

    let db_pool = create_pool(&db_config).await?;
    ensure_schema(&db_pool).await?;

    // External collaborators
    let planner = Arc::new(HttpPlannerClient::new(&app_config.planner_url));
    let cluster = Arc::new(HttpClusterClient::new(&app_config.cluster_url));
    let reporter = Arc::new(HttpReporterClient::new(&app_config.reporter_url));

    // Engine
    let registry = Arc::new(steps::build_registry(
        &app_config,
        planner,
        cluster,
        reporter,
    ));
    registry.validate()?;

    let queue = Arc::new(TaskQueue::new(db_pool.clone(), &app_config));
    let gate_manager = Arc::new(GateManager::new(db_pool.clone(), &app_config));

    let runner = Arc::new(Runner::new(
        db_pool.clone(),
        app_config.clone(),
        queue,
        registry,
        gate_manager.clone(),
    ));
    tokio::spawn(runner.run());
    tokio::spawn(gate_manager.clone().run_sweeper());

    // Services
    let workflow_service = WorkflowService::new(db_pool.clone());
    let event_service = EventService::new(db_pool.clone());
    let gate_service = GateService::new(db_pool.clone(), gate_manager);

    let state = AppState::new(db_pool, app_config.clone());
    let app = build_router(state, workflow_service, event_service, gate_service);

    let addr: SocketAddr = app_config.bind_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
