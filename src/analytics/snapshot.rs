use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;

use super::{annotate, DetectError, Detection};

/// Per-label cooldown gate for snapshot persistence. Labels are independent;
/// two accepted saves for one label are never closer than the interval.
pub struct RateLimiter {
    interval: Duration,
    last_save: Arc<Mutex<HashMap<String, Instant>>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_save: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn allow(&self, label: &str) -> bool {
        self.allow_at(label, Instant::now())
    }

    pub fn allow_at(&self, label: &str, now: Instant) -> bool {
        let mut last_save = self.last_save.lock().unwrap();
        match last_save.get(label) {
            Some(&last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                last_save.insert(label.to_string(), now);
                true
            }
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            last_save: Arc::clone(&self.last_save),
        }
    }
}

/// Writes detection crops as `<label>_<score>.jpg` under the output directory.
#[derive(Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn save(&self, frame: &Mat, det: &Detection) -> Result<PathBuf, DetectError> {
        let rect = annotate::bbox_rect(&det.bbox, frame.cols(), frame.rows());
        if rect.width <= 0 || rect.height <= 0 {
            return Err("empty crop region".into());
        }

        let crop = Mat::roi(frame, rect)?.try_clone()?;
        let filename = format!("{}_{:.2}.jpg", det.label_name.replace(' ', "_"), det.score);
        let path = self.dir.join(filename);

        let params = Vector::<i32>::new();
        imgcodecs::imwrite(
            path.to_str().ok_or("snapshot path is not valid UTF-8")?,
            &crop,
            &params,
        )?;

        Ok(path)
    }
}
