//! Lexplain API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Document uploads and simplification
//! - Authentication
//! - Request routing
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use lexplain_common::{
    auth::{build_verifier, IdentityVerifier},
    config::{AppConfig, ObservabilityConfig},
    credentials::load_service_account,
    db::{DbPool, SqlDocumentStore},
    metrics,
    store::{DocumentStore, DocumentStores, FirestoreStore, LocalMetadataStore},
};
use lexplain_simplifier::SimplificationService;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Room for multipart framing on top of the file size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stores: DocumentStores,
    pub local: Arc<LocalMetadataStore>,
    pub simplification: SimplificationService,
    pub verifier: Option<Arc<dyn IdentityVerifier>>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        stores: DocumentStores,
        verifier: Option<Arc<dyn IdentityVerifier>>,
    ) -> Self {
        let local = Arc::new(LocalMetadataStore::new(config.metadata_path()));
        let simplification =
            lexplain_simplifier::from_config(&config, stores.clone(), Some(local.clone()));

        Self {
            config,
            stores,
            local,
            simplification,
            verifier,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;
    let config = Arc::new(config);

    init_tracing(&config.observability);
    info!(
        service = %config.observability.service_name,
        "Starting Lexplain API Gateway v{}",
        lexplain_common::VERSION
    );

    // Initialize metrics
    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    let stores = connect_stores(&config).await;
    // Debug form keeps the configuration detail the client-facing message hides
    let verifier = build_verifier(&config)
        .map_err(|e| anyhow::anyhow!("Failed to build token verifier: {:?}", e))?;
    let state = AppState::new(config.clone(), stores, verifier);

    // Build the router
    let app = create_router(state);

    // Start the server
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;
    info!("Listening on {}", listener.local_addr()?);

    let shutdown = Arc::new(Notify::new());
    let signal_shutdown = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_shutdown.notify_one();
        })
        .into_future();

    let timeout = config.shutdown_timeout();
    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown.notified().await;
            tokio::time::sleep(timeout).await;
        } => warn!(timeout_secs = timeout.as_secs(), "Shutdown timeout elapsed, dropping open connections"),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Prometheus builder with our buckets; every series carries a `service` label
fn metrics_builder(config: &ObservabilityConfig) -> anyhow::Result<PrometheusBuilder> {
    let builder = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("simplification_duration_seconds".to_string()),
            metrics::SIMPLIFIER_BUCKETS,
        )?;
    Ok(builder)
}

fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    metrics_builder(config)?
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Connect whichever stores are configured. An unreachable store is logged
/// and treated as absent, never fatal.
async fn connect_stores(config: &AppConfig) -> DocumentStores {
    let primary: Option<Arc<dyn DocumentStore>> = match load_service_account(&config.firebase) {
        Some(account) => match FirestoreStore::new(account, &config.firebase) {
            Ok(store) => {
                info!(collection = %config.firebase.collection, "Primary store (Firestore) enabled");
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!(error = ?e, "Primary store unavailable");
                None
            }
        },
        None => {
            debug!("No service-account credentials; primary store unavailable");
            None
        }
    };

    let secondary: Option<Arc<dyn DocumentStore>> = match config.database.url.as_deref() {
        Some(url) => match DbPool::connect(url, &config.database).await {
            Ok(pool) => Some(Arc::new(SqlDocumentStore::new(pool))),
            Err(e) => {
                warn!(error = ?e, "Secondary store unavailable");
                None
            }
        },
        None => None,
    };

    let stores = DocumentStores::new(primary, secondary);
    if stores.is_available() {
        info!(mode = stores.mode().as_str(), "Document stores configured");
    } else {
        warn!(
            path = %config.metadata_path().display(),
            "No document store available; using local metadata file"
        );
    }
    stores
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = if state.config.server.cors_allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let upload_limit = state.config.uploads.max_file_size + MULTIPART_OVERHEAD;

    // Routes behind the auth gate (open when no verifier is configured)
    let documents = Router::new()
        .route(
            "/documents/upload",
            post(handlers::documents::upload)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(upload_limit)),
        )
        .route("/documents/simplify", post(handlers::documents::simplify))
        .route("/me", get(handlers::me::me))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_identity,
        ));

    // Compose the app
    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .merge(documents)
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
