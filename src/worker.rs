use std::sync::Arc;
use std::time::Duration;

use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use thiserror::Error;

use crate::analytics::{draw_boxes, DetectError, Detector, RateLimiter, SnapshotWriter};
use crate::camera::MjpegStream;
use crate::storage::{unix_timestamp, DetectionLog, DetectionRecord, FrameStore};
use crate::supervisor::Supervisor;

/// Everything a stream worker needs besides its device identity. Stores are
/// cheap `Arc` handles; one context is shared by all workers.
pub struct WorkerContext {
    pub client: reqwest::Client,
    pub frames: FrameStore,
    pub log: DetectionLog,
    pub limiter: RateLimiter,
    pub detector: Detector,
    pub snapshots: Option<SnapshotWriter>,
    pub failure_threshold: u32,
    pub backoff: Duration,
}

#[derive(Debug, Error)]
enum FrameError {
    #[error("frame processing failed: {0}")]
    Cv(#[from] opencv::Error),
    #[error("frame decoded empty")]
    EmptyFrame,
    #[error("jpeg encode failed")]
    Encode,
    #[error("detector failed: {0}")]
    Detector(DetectError),
}

/// Per-device stream loop: connect, read frames, publish results, reconnect
/// with backoff on failure, and self-evict after sustained failure. Eviction
/// is the only exit besides process shutdown.
pub async fn run(device: String, ctx: Arc<WorkerContext>, supervisor: Supervisor) {
    let url = format!("http://{device}/");
    let mut failures = FailureCounter::new(ctx.failure_threshold);

    'outer: loop {
        tracing::info!(device = %device, url = %url, "connecting to device stream");

        let mut stream = match MjpegStream::open(&ctx.client, &url).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    device = %device,
                    error = %e,
                    failures = failures.count() + 1,
                    "failed to open stream"
                );
                if failures.record() {
                    break;
                }
                tokio::time::sleep(ctx.backoff).await;
                continue;
            }
        };

        failures.reset();
        tracing::info!(device = %device, "stream opened");

        loop {
            match stream.next_frame().await {
                Ok(Some(jpeg)) => match process_frame(&device, &jpeg, &ctx) {
                    Ok(()) => failures.reset(),
                    Err(FrameError::Detector(e)) => {
                        // Transient detector failure: counted, but the stream
                        // itself is still healthy, so keep reading.
                        tracing::warn!(device = %device, error = %e, "detector failure");
                        if failures.record() {
                            break 'outer;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(device = %device, error = %e, "bad frame");
                        if failures.record() {
                            break 'outer;
                        }
                        break;
                    }
                },
                Ok(None) => {
                    tracing::warn!(device = %device, "stream ended");
                    if failures.record() {
                        break 'outer;
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(device = %device, error = %e, "stream read failed");
                    if failures.record() {
                        break 'outer;
                    }
                    break;
                }
            }
        }

        drop(stream);
        tracing::info!(
            device = %device,
            backoff_secs = ctx.backoff.as_secs(),
            "reconnecting after backoff"
        );
        tokio::time::sleep(ctx.backoff).await;
    }

    tracing::error!(
        device = %device,
        threshold = ctx.failure_threshold,
        "failure threshold exceeded, evicting device"
    );
    supervisor.evict(&device);
}

fn process_frame(device: &str, jpeg: &[u8], ctx: &WorkerContext) -> Result<(), FrameError> {
    let raw = Mat::from_slice(jpeg)?;
    let frame = imgcodecs::imdecode(&raw, imgcodecs::IMREAD_COLOR)?;
    if frame.rows() == 0 || frame.cols() == 0 {
        return Err(FrameError::EmptyFrame);
    }

    let detections = ctx.detector.detect(&frame).map_err(FrameError::Detector)?;

    let annotated = draw_boxes(&frame, &detections)?;
    let mut encoded = Vector::<u8>::new();
    if !imgcodecs::imencode(".jpg", &annotated, &mut encoded, &Vector::new())? {
        return Err(FrameError::Encode);
    }
    ctx.frames.put(device, encoded.to_vec());

    if detections.is_empty() {
        return Ok(());
    }

    tracing::debug!(
        device = %device,
        count = detections.len(),
        "detections published"
    );

    ctx.log.append(DetectionRecord {
        source: device.to_string(),
        timestamp: unix_timestamp(),
        detections: detections.clone(),
    });

    if let Some(writer) = &ctx.snapshots {
        for det in &detections {
            if !ctx.limiter.allow(&det.label_name) {
                continue;
            }
            if let Err(e) = writer.save(&frame, det) {
                tracing::warn!(
                    device = %device,
                    label = %det.label_name,
                    error = %e,
                    "failed to save snapshot"
                );
            }
        }
    }

    Ok(())
}

/// Consecutive-failure counter behind the threshold-then-evict policy. Any
/// success resets it; `record` reports whether the threshold was reached.
pub(crate) struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    pub(crate) fn record(&mut self) -> bool {
        self.count += 1;
        self.count >= self.threshold
    }

    pub(crate) fn reset(&mut self) {
        self.count = 0;
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }
}
