mod detections;
mod frames;

pub use detections::{DetectionLog, DetectionRecord};
pub use frames::{FrameEntry, FrameStore};

pub(crate) fn unix_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
