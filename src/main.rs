//! Sales spreadsheet ingestion service: uploads of vendas, cotações and
//! produtos cotados exports, normalized and deduplicated into SQLite.

mod cache;
mod columns;
mod config;
mod error;
mod fingerprint;
mod migrate;
mod normalize;
mod pipeline;
mod sheet;
mod store;
mod table;
mod validate;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use cache::TtlCache;
use config::AppConfig;
use pipeline::{IngestOutcome, Ingestor, UploadFile};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use store::{DatasetSummary, Statistics, Store};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: Store,
    ingestor: Arc<Ingestor>,
    stats_cache: Arc<TtlCache<Statistics>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repdash_ingest=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    // Open the database, creating it on first run, and sync the schema
    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let report = migrate::migrate(&pool).await?;
    info!(
        "Database ready at {} ({} tables created, {} columns added)",
        config.database_url,
        report.created_tables.len(),
        report.added_columns.len()
    );

    // Build application state
    let store = Store::new(pool);
    let state = AppState {
        ingestor: Arc::new(Ingestor::new(store.clone())),
        stats_cache: Arc::new(TtlCache::new(config.stats_cache_ttl)),
        store,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/datasets", get(list_datasets))
        .route("/datasets/latest", get(latest_dataset))
        .route("/stats", get(stats))
        .route("/maintenance/prune-orphans", post(prune_orphans))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(serde::Deserialize)]
struct UploadQuery {
    /// Human-readable dataset label; defaults to an upload timestamp.
    label: Option<String>,
    uploaded_by: Option<String>,
}

/// Upload one or more spreadsheet files as a single dataset.
async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<IngestOutcome>, (StatusCode, String)> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read '{}': {}", filename, e),
                )
            })?
            .to_vec();
        info!("Received file: {} ({} bytes)", filename, data.len());
        files.push(UploadFile { filename, data });
    }

    let name = query
        .label
        .unwrap_or_else(|| format!("Upload {}", chrono::Utc::now().format("%Y-%m-%d %H:%M")));

    let outcome = state
        .ingestor
        .ingest(&name, query.uploaded_by.as_deref(), &files)
        .await
        .map_err(|e| {
            error!("Ingest failed: {}", e);
            (e.status_code(), e.to_string())
        })?;

    if !outcome.duplicate {
        state.stats_cache.invalidate().await;
    }

    Ok(Json(outcome))
}

/// List all uploaded datasets, newest first.
async fn list_datasets(
    State(state): State<AppState>,
) -> Result<Json<Vec<DatasetSummary>>, (StatusCode, String)> {
    state
        .store
        .list_datasets()
        .await
        .map(Json)
        .map_err(internal_error)
}

/// The most recent dataset.
async fn latest_dataset(
    State(state): State<AppState>,
) -> Result<Json<DatasetSummary>, (StatusCode, String)> {
    state
        .store
        .latest_dataset()
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "No datasets uploaded yet".to_string()))
}

/// Aggregate row counts, cached briefly.
async fn stats(
    State(state): State<AppState>,
) -> Result<Json<Statistics>, (StatusCode, String)> {
    if let Some(cached) = state.stats_cache.get().await {
        return Ok(Json(cached));
    }
    let fresh = state.store.statistics().await.map_err(internal_error)?;
    state.stats_cache.put(fresh.clone()).await;
    Ok(Json(fresh))
}

#[derive(serde::Serialize)]
struct PruneResponse {
    pruned: u64,
}

/// Remove registry rows with no fingerprints left over from old databases.
async fn prune_orphans(
    State(state): State<AppState>,
) -> Result<Json<PruneResponse>, (StatusCode, String)> {
    let pruned = state.store.prune_orphans().await.map_err(internal_error)?;
    if pruned > 0 {
        state.stats_cache.invalidate().await;
    }
    Ok(Json(PruneResponse { pruned }))
}

fn internal_error(e: sqlx::Error) -> (StatusCode, String) {
    error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Database error: {}", e),
    )
}
