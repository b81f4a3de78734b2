use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vehicle_count::{
    app_state::WorkerContext,
    config::AppConfig,
    db::{self, PgVideoStore},
    services::{
        consumer::Consumer,
        events::{RedisEventSink, StatusPublisher},
        queue::{JobQueue, JobStream},
        storage::ObjectStorage,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting vehicle counting worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let settings = config.worker_settings();
    if config.heartbeat_outlasts_reclaim() {
        tracing::warn!(
            heartbeat_gap_secs = config.heartbeat_gap().as_secs(),
            reclaim_idle_ms = config.reclaim_idle_ms,
            "Slow detector calls can outlast RECLAIM_IDLE_MS; live jobs may be reclaimed"
        );
    }

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to start Prometheus listener");
        tracing::info!(%addr, "Serving worker metrics");
    }
    metrics::describe_histogram!(
        "vehicle_count_processing_seconds",
        "Time from claim to terminal decision for one video"
    );
    metrics::describe_counter!("vehicle_count_jobs_completed", "Videos counted successfully");
    metrics::describe_counter!("vehicle_count_jobs_failed", "Videos recorded as FAILED");
    metrics::describe_counter!(
        "vehicle_count_jobs_skipped",
        "Deliveries acknowledged because the video was already terminal"
    );
    metrics::describe_counter!("vehicle_count_jobs_malformed", "Undecodable job entries");
    metrics::describe_counter!(
        "vehicle_count_vehicles_total",
        "Vehicles counted, by size category"
    );

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = ObjectStorage::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage client");

    let queue = JobQueue::new(&config.redis_url, &config.job_stream, &config.consumer_group)
        .expect("Failed to initialize job queue");
    queue
        .ensure_group()
        .await
        .expect("Failed to register consumer group");

    let events = RedisEventSink::new(
        &config.redis_url,
        &config.event_stream,
        config.event_stream_max_len,
    )
    .expect("Failed to initialize event channel");

    let ctx = WorkerContext {
        store: Arc::new(PgVideoStore::new(db_pool)),
        queue: Arc::new(queue),
        blobs: Arc::new(storage),
        events: StatusPublisher::new(Arc::new(events)),
        vision: Arc::new(config.vision()),
        settings,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, finishing in-flight job"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, finishing in-flight job"),
        }
        let _ = shutdown_tx.send(true);
    });

    let consumer = Consumer::new(ctx);
    tracing::info!(
        consumer = %consumer.name(),
        stream = %config.job_stream,
        group = %config.consumer_group,
        "Worker ready, starting job processing loop"
    );

    consumer.run(shutdown_rx).await;
    tracing::info!("Worker stopped");
}
