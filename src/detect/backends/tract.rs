#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Observation};
use crate::frame::Frame;

const BOX_CHANNELS: usize = 4;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` with `cx, cy, w, h`
/// in input pixels followed by per-class scores. Frames must already be sized to the
/// model input; the RTSP pipeline scales to the configured frame size.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    confidence_floor: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_floor: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the candidate floor and NMS overlap threshold.
    pub fn with_thresholds(mut self, confidence_floor: f32, iou_threshold: f32) -> Self {
        self.confidence_floor = confidence_floor;
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        let expected_len = frame
            .expected_len()
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let pixels = frame.pixels();
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Observation>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= BOX_CHANNELS {
            bail!("unexpected detector output shape {:?}", shape);
        }
        let classes = shape[1] - BOX_CHANNELS;
        let anchors = shape[2];
        let (w_in, h_in) = (self.width as f32, self.height as f32);

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..classes {
                let score = preds[[0, BOX_CHANNELS + c, a]];
                if score > best_score {
                    best_class = c;
                    best_score = score;
                }
            }
            if !best_score.is_finite() || best_score < self.confidence_floor {
                continue;
            }
            let cx = preds[[0, 0, a]] / w_in;
            let cy = preds[[0, 1, a]] / h_in;
            let w = preds[[0, 2, a]] / w_in;
            let h = preds[[0, 3, a]] / h_in;
            let bbox = BoundingBox {
                x: (cx - w / 2.0).clamp(0.0, 1.0),
                y: (cy - h / 2.0).clamp(0.0, 1.0),
                w,
                h,
            };
            candidates.push(Observation::new(best_class as u32, best_score.min(1.0)).with_bbox(bbox));
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Observation>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            vec![0u8; (self.width as usize) * (self.height as usize) * 3],
            self.width,
            self.height,
            0,
        );
        self.detect(&blank).map(|_| ())
    }
}

/// Greedy per-class NMS: keep the highest-confidence box and drop same-class boxes
/// overlapping it by more than `iou_threshold`.
fn non_max_suppression(mut candidates: Vec<Observation>, iou_threshold: f32) -> Vec<Observation> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Observation> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id
                && match (&k.bbox, &candidate.bbox) {
                    (Some(a), Some(b)) => a.iou(b) > iou_threshold,
                    _ => false,
                }
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(class_id: u32, confidence: f32, x: f32) -> Observation {
        Observation::new(class_id, confidence).with_bbox(BoundingBox {
            x,
            y: 0.1,
            w: 0.2,
            h: 0.2,
        })
    }

    #[test]
    fn nms_drops_overlapping_boxes_of_same_class_only() {
        let kept = non_max_suppression(
            vec![obs(0, 0.6, 0.11), obs(0, 0.9, 0.1), obs(1, 0.7, 0.1), obs(0, 0.8, 0.6)],
            0.45,
        );
        let summary: Vec<(u32, f32)> = kept.iter().map(|o| (o.class_id, o.confidence)).collect();
        assert_eq!(summary, vec![(0, 0.9), (0, 0.8), (1, 0.7)]);
    }
}
