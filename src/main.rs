use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vehicle_count::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgVideoStore},
    routes,
    services::{queue::JobQueue, storage::ObjectStorage},
};

/// Largest accepted video upload.
const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing vehicle-count API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "vehicle_count_jobs_submitted",
        "Videos accepted and enqueued for counting"
    );
    metrics::describe_gauge!(
        "vehicle_count_queue_depth",
        "Entries retained in the job stream"
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing object storage client");
    let storage = ObjectStorage::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage client");

    tracing::info!(stream = %config.job_stream, "Connecting to Redis job stream");
    let queue = JobQueue::new(&config.redis_url, &config.job_stream, &config.consumer_group)
        .expect("Failed to initialize job queue");

    let state = AppState::new(PgVideoStore::new(db_pool), storage, queue);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/cctv",
            get(routes::videos::list_videos).put(routes::videos::upload_video),
        )
        .route("/api/v1/cctv/{video_id}", get(routes::videos::get_video))
        .route(
            "/api/v1/cctv/{video_id}/requeue",
            post(routes::videos::requeue_video),
        )
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES));

    tracing::info!("Starting vehicle-count API on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
