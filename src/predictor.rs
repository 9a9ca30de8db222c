// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The predictor abstraction: a black box loaded from a binary blob,
//! exposing `{load_from_path, predict, draw}`. This isolates the core from
//! the concrete ML runtime — swapping `OrtPredictor` for another backend
//! never touches the Detector Worker.

use std::path::Path;

use crate::error::{NvrError, Result};
use crate::frame::Frame;

/// One detected object, in pixel coordinates of the frame it was run against.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: i32,
    /// Present only in tracking mode; stripped in stateless mode.
    pub track_id: Option<u64>,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// A loaded model instance bound to one predictor handle. Not assumed
/// re-entrant: the owning Detector Worker serialises access behind its own
/// lock.
pub trait Predictor: Send {
    /// Run one inference pass. `tracking` selects a stateful tracker
    /// (identities persist) versus stateless detection (ids always `None`).
    fn predict(&mut self, frame: &Frame, tracking: bool) -> Result<Vec<Detection>>;

    /// The model's expected input resolution, used for preprocessing.
    fn model_input_size(&self) -> (u32, u32);
}

/// Loads a `Predictor` from a path on disk (the Detector Worker writes the
/// model blob to a temp file before calling this).
pub trait PredictorLoader: Send + Sync {
    fn load_from_path(&self, path: &Path) -> Result<Box<dyn Predictor>>;

    /// File suffix this loader expects for its temp blob file, e.g. `.onnx`.
    fn blob_suffix(&self) -> &'static str;
}

/// Restrict detections to class id 0 ("person") when the model's name,
/// trimmed and lower-cased, equals `"pretrained"`.
pub fn apply_pretrained_filter(model_name: &str, detections: Vec<Detection>) -> Vec<Detection> {
    if model_name.trim().eq_ignore_ascii_case("pretrained") {
        detections.into_iter().filter(|d| d.class_id == 0).collect()
    } else {
        detections
    }
}

/// Strip track ids from a detection set, used when tracking mode is off to
/// prevent stale identities from bleeding across mode changes.
pub fn strip_track_ids(detections: &mut [Detection]) {
    for d in detections.iter_mut() {
        d.track_id = None;
    }
}

/// Default predictor backend: an ONNX Runtime session loaded from a temp
/// file path, with a deliberately simple output decode (the ML inference
/// library itself is explicitly out of scope; this exists to make the
/// trait object concrete, not to be production-grade object detection).
pub struct OrtPredictor {
    session: ort::session::Session,
    input_w: u32,
    input_h: u32,
    confidence_threshold: f32,
}

impl OrtPredictor {
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

/// Builds `OrtPredictor` instances from a model file path.
pub struct OrtPredictorLoader;

impl PredictorLoader for OrtPredictorLoader {
    fn load_from_path(&self, path: &Path) -> Result<Box<dyn Predictor>> {
        let session = ort::session::Session::builder()
            .map_err(|e| NvrError::Predictor(format!("ort session builder: {e}")))?
            .commit_from_file(path)
            .map_err(|e| NvrError::Predictor(format!("ort model load failed: {e}")))?;

        // Default 640x640, the common YOLO export input size; a real
        // deployment would introspect `session.inputs()[0].input_type`.
        Ok(Box::new(OrtPredictor {
            session,
            input_w: 640,
            input_h: 640,
            confidence_threshold: 0.4,
        }))
    }

    fn blob_suffix(&self) -> &'static str {
        ".onnx"
    }
}

impl Predictor for OrtPredictor {
    fn predict(&mut self, frame: &Frame, tracking: bool) -> Result<Vec<Detection>> {
        let img = frame
            .to_image()
            .ok_or_else(|| NvrError::Predictor("frame buffer size mismatch".into()))?;
        let letterboxed = image::imageops::resize(
            &img,
            self.input_w,
            self.input_h,
            image::imageops::FilterType::Lanczos3,
        );

        let mut chw = vec![0f32; 3 * (self.input_w * self.input_h) as usize];
        let plane = (self.input_w * self.input_h) as usize;
        for (i, px) in letterboxed.pixels().enumerate() {
            chw[i] = px[0] as f32 / 255.0;
            chw[plane + i] = px[1] as f32 / 255.0;
            chw[2 * plane + i] = px[2] as f32 / 255.0;
        }

        let input = ort::value::Tensor::from_array((
            [1usize, 3, self.input_h as usize, self.input_w as usize],
            chw,
        ))
        .map_err(|e| NvrError::Predictor(format!("tensor build failed: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| NvrError::Predictor(format!("inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| NvrError::Predictor(format!("output extraction failed: {e}")))?;

        // Expect rows of [x1, y1, x2, y2, confidence, class_id] scaled back
        // to the original frame's pixel coordinates.
        let row_len = 6usize;
        let rows = if shape.len() == 2 {
            shape[0] as usize
        } else {
            data.len() / row_len
        };
        let scale_x = frame.width as f32 / self.input_w as f32;
        let scale_y = frame.height as f32 / self.input_h as f32;

        let mut detections = Vec::new();
        for r in 0..rows {
            let base = r * row_len;
            if base + row_len > data.len() {
                break;
            }
            let confidence = data[base + 4];
            if confidence < self.confidence_threshold {
                continue;
            }
            detections.push(Detection {
                x1: data[base] * scale_x,
                y1: data[base + 1] * scale_y,
                x2: data[base + 2] * scale_x,
                y2: data[base + 3] * scale_y,
                confidence,
                class_id: data[base + 5] as i32,
                track_id: None,
            });
        }

        if !tracking {
            strip_track_ids(&mut detections);
        }
        Ok(detections)
    }

    fn model_input_size(&self) -> (u32, u32) {
        (self.input_w, self.input_h)
    }
}

/// Deterministic fake predictor used by tests, so reconciliation and
/// streaming logic can be exercised without a real model file or ONNX
/// runtime session.
#[derive(Clone, Default)]
pub struct TestPredictor {
    pub fixed_detections: Vec<Detection>,
}

impl Predictor for TestPredictor {
    fn predict(&mut self, _frame: &Frame, tracking: bool) -> Result<Vec<Detection>> {
        let mut out = self.fixed_detections.clone();
        if !tracking {
            strip_track_ids(&mut out);
        }
        Ok(out)
    }

    fn model_input_size(&self) -> (u32, u32) {
        (640, 480)
    }
}

pub struct TestPredictorLoader {
    pub fixed_detections: Vec<Detection>,
}

impl PredictorLoader for TestPredictorLoader {
    fn load_from_path(&self, _path: &Path) -> Result<Box<dyn Predictor>> {
        Ok(Box::new(TestPredictor {
            fixed_detections: self.fixed_detections.clone(),
        }))
    }

    fn blob_suffix(&self) -> &'static str {
        ".bin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: i32) -> Detection {
        Detection {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
            confidence: 0.9,
            class_id,
            track_id: Some(1),
        }
    }

    #[test]
    fn pretrained_filter_keeps_only_class_zero() {
        let dets = vec![det(0), det(1), det(2)];
        let filtered = apply_pretrained_filter("Pretrained", dets);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].class_id, 0);
    }

    #[test]
    fn pretrained_filter_is_case_and_whitespace_insensitive() {
        let dets = vec![det(0), det(1)];
        let filtered = apply_pretrained_filter("  PreTrained  ", dets);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn non_pretrained_model_keeps_all_classes() {
        let dets = vec![det(0), det(1), det(2)];
        let filtered = apply_pretrained_filter("people", dets);
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn strip_track_ids_clears_all() {
        let mut dets = vec![det(0), det(1)];
        strip_track_ids(&mut dets);
        assert!(dets.iter().all(|d| d.track_id.is_none()));
    }
}
