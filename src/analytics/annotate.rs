use opencv::core::{Mat, Point, Rect, Scalar};
use opencv::imgproc;
use opencv::prelude::*;

use super::Detection;

const FONT_SCALE: f64 = 0.5;
const BOX_THICKNESS: i32 = 2;

/// Draw labeled boxes on a copy of the frame; the input is left untouched.
pub fn draw_boxes(frame: &Mat, detections: &[Detection]) -> opencv::Result<Mat> {
    let mut out = frame.try_clone()?;
    let color = Scalar::new(0.0, 255.0, 0.0, 0.0);

    for det in detections {
        let rect = bbox_rect(&det.bbox, out.cols(), out.rows());
        if rect.width <= 0 || rect.height <= 0 {
            continue;
        }

        imgproc::rectangle(&mut out, rect, color, BOX_THICKNESS, imgproc::LINE_8, 0)?;

        let text = format!("{}: {:.2}", det.label_name, det.score);
        let mut baseline = 0;
        let text_size = imgproc::get_text_size(
            &text,
            imgproc::FONT_HERSHEY_SIMPLEX,
            FONT_SCALE,
            1,
            &mut baseline,
        )?;

        let origin = Point::new(rect.x, (rect.y - 6).max(text_size.height + 2));
        let backdrop = Rect::new(
            origin.x,
            origin.y - text_size.height - 2,
            text_size.width,
            text_size.height + baseline,
        );
        imgproc::rectangle(&mut out, backdrop, color, imgproc::FILLED, imgproc::LINE_8, 0)?;
        imgproc::put_text(
            &mut out,
            &text,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            FONT_SCALE,
            Scalar::new(0.0, 0.0, 0.0, 0.0),
            1,
            imgproc::LINE_8,
            false,
        )?;
    }

    Ok(out)
}

/// Integer pixel rect for a corner-form bbox, clamped to the image bounds.
pub fn bbox_rect(bbox: &[f32; 4], cols: i32, rows: i32) -> Rect {
    let x1 = (bbox[0] as i32).clamp(0, cols);
    let y1 = (bbox[1] as i32).clamp(0, rows);
    let x2 = (bbox[2] as i32).clamp(0, cols);
    let y2 = (bbox[3] as i32).clamp(0, rows);
    Rect::new(x1, y1, x2 - x1, y2 - y1)
}
