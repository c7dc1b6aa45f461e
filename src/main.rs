use std::time::Duration;

use tracing_subscriber::EnvFilter;

mod analytics;
mod api;
mod camera;
mod config;
mod discovery;
mod storage;
mod supervisor;
mod worker;

use analytics::{Detector, RateLimiter, SnapshotWriter, YoloModel};
use api::AppState;
use config::Config;
use discovery::DiscoveryListener;
use storage::{DetectionLog, FrameStore};
use supervisor::Supervisor;
use worker::WorkerContext;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=debug".parse()?))
        .init();

    let config = Config::load()?;

    let model = YoloModel::load(
        &config.detector.model_path,
        config.detector.confidence_threshold,
        config.detector.allowed_classes.clone(),
    )?;
    let detector = Detector::new(Box::new(model));
    tracing::info!(model = %config.detector.model_path, "object detector ready");

    let frames = FrameStore::new();
    let detections = DetectionLog::new(config.detection_log.capacity);

    let interval = if config.rate_limiter.enable {
        Duration::from_secs_f64(config.rate_limiter.interval_secs)
    } else {
        Duration::ZERO
    };
    let limiter = RateLimiter::new(interval);

    let snapshots = if config.snapshots.save_detections {
        Some(SnapshotWriter::new(&config.snapshots.output_dir)?)
    } else {
        None
    };

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    let supervisor = Supervisor::new(WorkerContext {
        client,
        frames: frames.clone(),
        log: detections.clone(),
        limiter,
        detector,
        snapshots,
        failure_threshold: config.worker.failure_threshold,
        backoff: Duration::from_secs(config.worker.backoff_secs),
    });

    let listener = DiscoveryListener::bind(
        config.discovery.port,
        config.discovery.device_tag.clone(),
        supervisor.clone(),
    )
    .await?;
    tracing::info!(
        port = listener.port(),
        tag = %config.discovery.device_tag,
        "discovery listener ready"
    );
    let discovery_handle = tokio::spawn(listener.run());

    let state = AppState {
        supervisor,
        frames,
        detections,
    };

    tokio::select! {
        result = api::start_server(state, config.http.port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    discovery_handle.abort();
    tracing::info!("shutdown complete");

    Ok(())
}
