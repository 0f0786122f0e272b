#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::PlateDetector;
use crate::detect::result::{BoundingBox, Detection};

const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for a single-class YOLO plate model exported to ONNX.
///
/// Expects the usual YOLOv8 head: one output of shape `[1, 5, N]` holding
/// `(cx, cy, w, h, score)` per anchor in model-input pixels. Frames are
/// resized to the model input and boxes are scaled back to frame pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    min_confidence: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            min_confidence: 0.25,
        })
    }

    /// Override the minimum score a candidate needs to be reported.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let frame = RgbImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
            anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                width as usize * height as usize * 3,
                width,
                height,
                pixels.len()
            )
        })?;
        let resized = imageops::resize(
            &frame,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }

        let scale_x = width as f32 / self.input_width as f32;
        let scale_y = height as f32 / self.input_height as f32;
        let mut candidates = Vec::new();
        for i in 0..shape[2] {
            let score = view[[0, 4, i]];
            if !score.is_finite() || score < self.min_confidence {
                continue;
            }
            let (cx, cy) = (view[[0, 0, i]], view[[0, 1, i]]);
            let (w, h) = (view[[0, 2, i]], view[[0, 3, i]]);
            let bbox = BoundingBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            );
            candidates.push(Detection::new(bbox, score.min(1.0)));
        }
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

impl PlateDetector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = vec![0u8; self.input_width as usize * self.input_height as usize * 3];
        self.detect(&blank, self.input_width, self.input_height)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let kept = non_max_suppression(
            vec![
                Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.6),
                Detection::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0.9),
                Detection::new(BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0.5),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.5);
    }
}
