use std::sync::{Arc, Mutex};

use ndarray::{Array4, ArrayViewD};
use opencv::core::Mat;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use serde::Serialize;

pub type DetectError = Box<dyn std::error::Error + Send + Sync>;

const MODEL_INPUT_SIZE: u32 = 640;
const IOU_THRESHOLD: f32 = 0.45;

pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// One classified bounding box for one frame. Coordinates are corner form
/// `[x1, y1, x2, y2]` in the original image space.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub score: f32,
    pub label_id: usize,
    pub label_name: String,
}

/// Inference backend. Implementations must not mutate the input frame.
pub trait Model: Send {
    fn infer(&mut self, frame: &Mat) -> Result<Vec<Detection>, DetectError>;
}

/// Shared detector handle. One model session serves all workers; access is
/// serialized here so callers never coordinate with each other.
pub struct Detector {
    model: Arc<Mutex<Box<dyn Model>>>,
}

impl Detector {
    pub fn new(model: Box<dyn Model>) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
        }
    }

    pub fn detect(&self, frame: &Mat) -> Result<Vec<Detection>, DetectError> {
        self.model.lock().unwrap().infer(frame)
    }
}

impl Clone for Detector {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
        }
    }
}

pub struct YoloModel {
    session: Session,
    confidence_threshold: f32,
    allowed_classes: Vec<String>,
}

impl YoloModel {
    pub fn load(
        model_path: &str,
        confidence_threshold: f32,
        allowed_classes: Vec<String>,
    ) -> Result<Self, DetectError> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        let session = if model_path.starts_with("http://") || model_path.starts_with("https://") {
            builder.commit_from_url(model_path)?
        } else {
            builder.commit_from_file(model_path)?
        };

        Ok(Self {
            session,
            confidence_threshold,
            allowed_classes,
        })
    }

    fn preprocess(&self, frame: &Mat) -> Result<(Array4<f32>, f32, f32, f32), DetectError> {
        use opencv::core::{Mat, Size, BORDER_CONSTANT};
        use opencv::imgproc;
        use opencv::prelude::*;

        let rows = frame.rows() as f32;
        let cols = frame.cols() as f32;
        let input_size = MODEL_INPUT_SIZE as f32;

        // Letterbox: scale to fit, pad the rest with neutral gray.
        let scale = (input_size / cols).min(input_size / rows);
        let new_w = (cols * scale).round() as i32;
        let new_h = (rows * scale).round() as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let pad_x = ((input_size as i32 - new_w) / 2) as f32;
        let pad_y = ((input_size as i32 - new_h) / 2) as f32;

        let mut padded = Mat::default();
        opencv::core::copy_make_border(
            &resized,
            &mut padded,
            pad_y as i32,
            input_size as i32 - new_h - pad_y as i32,
            pad_x as i32,
            input_size as i32 - new_w - pad_x as i32,
            BORDER_CONSTANT,
            opencv::core::Scalar::new(114.0, 114.0, 114.0, 0.0),
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&padded, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let data = rgb.data_bytes()?;
        let side = MODEL_INPUT_SIZE as usize;
        if data.len() < side * side * 3 {
            return Err("frame data too small after letterbox".into());
        }

        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for y in 0..side {
            for x in 0..side {
                let idx = (y * side + x) * 3;
                tensor[[0, 0, y, x]] = data[idx] as f32 / 255.0;
                tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
                tensor[[0, 2, y, x]] = data[idx + 2] as f32 / 255.0;
            }
        }

        Ok((tensor, scale, pad_x, pad_y))
    }
}

impl Model for YoloModel {
    fn infer(&mut self, frame: &Mat) -> Result<Vec<Detection>, DetectError> {
        use opencv::prelude::*;

        let rows = frame.rows();
        let cols = frame.cols();
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }

        let (input_tensor, scale, pad_x, pad_y) = self.preprocess(frame)?;

        let tensor_ref = TensorRef::from_array_view(input_tensor.view())?.into_dyn();
        let outputs = self.session.run(ort::inputs![tensor_ref])?;

        // Ultralytics YOLOv8 exports put the whole head in "output0".
        let Some(output) = outputs.get("output0") else {
            return Err("unsupported model format: expected a YOLOv8 'output0' head".into());
        };
        let preds = output.try_extract_array::<f32>()?;
        let preds_owned = preds.to_owned();
        drop(outputs);

        let candidates = decode_predictions(
            &preds_owned.view(),
            self.confidence_threshold,
            scale,
            pad_x,
            pad_y,
            cols as f32,
            rows as f32,
        )?;

        let mut detections = non_max_suppression(candidates, IOU_THRESHOLD);
        if !self.allowed_classes.is_empty() {
            detections.retain(|d| self.allowed_classes.contains(&d.label_name));
        }

        Ok(detections)
    }
}

/// Decode a YOLOv8 head of shape [1, 4 + classes, anchors]: per anchor a
/// (cx, cy, w, h) box in model-input pixels followed by per-class scores.
fn decode_predictions(
    preds: &ArrayViewD<f32>,
    confidence_threshold: f32,
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    orig_w: f32,
    orig_h: f32,
) -> Result<Vec<Detection>, DetectError> {
    let shape = preds.shape();
    if shape.len() != 3 || shape[1] < 5 {
        return Err(format!("unsupported model output shape {shape:?}").into());
    }

    let num_classes = shape[1] - 4;
    let anchors = shape[2];
    let flat = preds.as_slice().ok_or("model output not contiguous")?;
    let at = |attr: usize, anchor: usize| flat[attr * anchors + anchor];

    let mut detections = Vec::new();

    for i in 0..anchors {
        let mut best_score = 0.0f32;
        let mut best_class = 0usize;
        for c in 0..num_classes {
            let score = at(4 + c, i);
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        let cx = at(0, i);
        let cy = at(1, i);
        let w = at(2, i);
        let h = at(3, i);

        // Undo the letterbox, then clamp to image bounds.
        let x1 = (((cx - w / 2.0) - pad_x) / scale).clamp(0.0, orig_w);
        let y1 = (((cy - h / 2.0) - pad_y) / scale).clamp(0.0, orig_h);
        let x2 = (((cx + w / 2.0) - pad_x) / scale).clamp(0.0, orig_w);
        let y2 = (((cy + h / 2.0) - pad_y) / scale).clamp(0.0, orig_h);

        let label_name = COCO_CLASSES
            .get(best_class)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("class_{best_class}"));

        detections.push(Detection {
            bbox: [x1, y1, x2, y2],
            score: best_score,
            label_id: best_class,
            label_name,
        });
    }

    Ok(detections)
}

fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.label_id == candidate.label_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}
