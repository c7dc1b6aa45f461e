mod annotate;
mod detector;
mod snapshot;

pub use annotate::draw_boxes;
pub use detector::{DetectError, Detection, Detector, Model, YoloModel};
pub use snapshot::{RateLimiter, SnapshotWriter};
