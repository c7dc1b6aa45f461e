use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::worker::{self, WorkerContext};

/// Owns the set of active per-device workers. The handle map is the single
/// source of truth for "is this device owned by a worker"; registration and
/// eviction both go through its lock so two near-simultaneous announcements
/// cannot spawn duplicate workers.
pub struct Supervisor {
    workers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    ctx: Arc<WorkerContext>,
}

impl Supervisor {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            ctx: Arc::new(ctx),
        }
    }

    /// Spawn a stream worker for a newly discovered device. Returns false
    /// without side effects when a live worker already owns the key.
    pub fn register(&self, device: &str) -> bool {
        let mut workers = self.workers.lock().unwrap();
        if workers.contains_key(device) {
            return false;
        }

        let handle = tokio::spawn(worker::run(
            device.to_string(),
            Arc::clone(&self.ctx),
            self.clone(),
        ));
        workers.insert(device.to_string(), handle);
        tracing::info!(device = %device, "worker spawned");
        true
    }

    /// Remove a device's worker handle and its shared state. Idempotent.
    pub fn evict(&self, device: &str) {
        let removed = self.workers.lock().unwrap().remove(device);
        if removed.is_some() {
            self.ctx.frames.remove(device);
            tracing::info!(device = %device, "device evicted");
        }
    }

    /// Sorted active device keys; also the index order of the HTTP feeds.
    pub fn active(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.workers.lock().unwrap().keys().cloned().collect();
        devices.sort();
        devices
    }
}

impl Clone for Supervisor {
    fn clone(&self) -> Self {
        Self {
            workers: Arc::clone(&self.workers),
            ctx: Arc::clone(&self.ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use opencv::core::Mat;

    use crate::analytics::{DetectError, Detection, Detector, Model, RateLimiter};
    use crate::storage::{DetectionLog, FrameStore};

    struct NoopModel;

    impl Model for NoopModel {
        fn infer(&mut self, _frame: &Mat) -> Result<Vec<Detection>, DetectError> {
            Ok(Vec::new())
        }
    }

    fn test_context(failure_threshold: u32, backoff: Duration) -> WorkerContext {
        WorkerContext {
            client: reqwest::Client::new(),
            frames: FrameStore::new(),
            log: DetectionLog::new(50),
            limiter: RateLimiter::new(Duration::from_secs(5)),
            detector: Detector::new(Box::new(NoopModel)),
            snapshots: None,
            failure_threshold,
            backoff,
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_no_op() {
        let supervisor = Supervisor::new(test_context(100, Duration::from_secs(60)));

        assert!(supervisor.register("127.0.0.1:1"));
        assert!(!supervisor.register("127.0.0.1:1"));
        assert!(supervisor.register("127.0.0.1:2"));

        assert_eq!(
            supervisor.active(),
            vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()]
        );
    }

    #[tokio::test]
    async fn eviction_removes_the_worker_and_its_frame() {
        let supervisor = Supervisor::new(test_context(100, Duration::from_secs(60)));
        supervisor.register("127.0.0.1:1");
        supervisor.ctx.frames.put("127.0.0.1:1", vec![1, 2, 3]);

        supervisor.evict("127.0.0.1:1");
        supervisor.evict("127.0.0.1:1");

        assert!(supervisor.active().is_empty());
        assert!(supervisor.ctx.frames.get("127.0.0.1:1").is_none());
    }

    #[tokio::test]
    async fn worker_self_evicts_after_sustained_connect_failures() {
        // Port 1 on loopback refuses connections immediately.
        let supervisor = Supervisor::new(test_context(2, Duration::ZERO));
        supervisor.ctx.frames.put("127.0.0.1:1", vec![1]);
        assert!(supervisor.register("127.0.0.1:1"));

        for _ in 0..200 {
            if supervisor.active().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(supervisor.active().is_empty());
        assert!(supervisor.ctx.frames.get("127.0.0.1:1").is_none());
    }
}
