//! BlazeFace short-range detector (the `mediapipe` backend).
//!
//! 128×128 input, 896 fixed anchors over two feature maps. Each anchor
//! regresses a box plus six keypoints (eyes, nose, mouth, ears); only the
//! eyes and nose are kept as landmarks.

use super::{finalize, open_session, sigmoid, DetectorError, DetectorOptions, FaceDetect};
use crate::imaging::{self, ChannelOrder, Letterbox, TensorLayout};
use crate::types::{BoundingBox, Landmarks};
use image::{Rgb, RgbImage};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const BLAZEFACE_INPUT_SIZE: u32 = 128;
/// (stride, anchors per cell)
const BLAZEFACE_LAYERS: [(usize, usize); 2] = [(8, 2), (16, 6)];
const BLAZEFACE_NUM_ANCHORS: usize = 896;
const BLAZEFACE_REGRESSOR_LEN: usize = 16;
const BLAZEFACE_SCORE_CLIP: f32 = 100.0;

pub struct BlazeFaceDetector {
    session: Session,
    options: DetectorOptions,
    num_outputs: usize,
    anchors: Vec<(f32, f32)>,
}

impl BlazeFaceDetector {
    pub fn load(model_path: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        let session = open_session(model_path, options.intra_threads, "BlazeFace")?;
        let num_outputs = session.outputs().len();
        Ok(Self {
            session,
            options,
            num_outputs,
            anchors: generate_anchors(BLAZEFACE_INPUT_SIZE as usize),
        })
    }
}

impl FaceDetect for BlazeFaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (canvas, letterbox) = imaging::letterbox(
            image,
            BLAZEFACE_INPUT_SIZE,
            BLAZEFACE_INPUT_SIZE,
            Rgb([0, 0, 0]),
        );
        let input = imaging::to_tensor(&canvas, TensorLayout::Nchw, ChannelOrder::Rgb, |v, _| {
            v / 127.5 - 1.0
        });

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // The two outputs are told apart by size: [1, 896, 16] and [1, 896, 1].
        let mut regressors = None;
        let mut scores = None;
        for idx in 0..self.num_outputs {
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("output {idx}: {e}")))?;
            match data.len() {
                n if n == BLAZEFACE_NUM_ANCHORS * BLAZEFACE_REGRESSOR_LEN => regressors = Some(data),
                n if n == BLAZEFACE_NUM_ANCHORS => scores = Some(data),
                _ => {}
            }
        }
        let (Some(regressors), Some(scores)) = (regressors, scores) else {
            return Err(DetectorError::InferenceFailed(
                "BlazeFace outputs must be [1, 896, 16] regressors and [1, 896, 1] scores".into(),
            ));
        };

        let detections = decode(
            regressors,
            scores,
            &self.anchors,
            BLAZEFACE_INPUT_SIZE as f32,
            &letterbox,
            self.options.confidence_threshold,
        );
        let faces = finalize(detections, image.width(), image.height(), self.options.nms_threshold);
        tracing::debug!(count = faces.len(), "BlazeFace detections");
        Ok(faces)
    }
}

/// Anchor centers, normalized to [0, 1], in network output order.
fn generate_anchors(input_size: usize) -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(BLAZEFACE_NUM_ANCHORS);
    for (stride, per_cell) in BLAZEFACE_LAYERS {
        let grid = input_size / stride;
        for row in 0..grid {
            for col in 0..grid {
                let center = ((col as f32 + 0.5) / grid as f32, (row as f32 + 0.5) / grid as f32);
                anchors.extend(std::iter::repeat(center).take(per_cell));
            }
        }
    }
    anchors
}

fn decode(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[(f32, f32)],
    input_size: f32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let mut detections = Vec::new();

    for (i, &(ax, ay)) in anchors.iter().enumerate() {
        let raw_score = scores.get(i).copied().unwrap_or(f32::NEG_INFINITY);
        let score = sigmoid(raw_score.clamp(-BLAZEFACE_SCORE_CLIP, BLAZEFACE_SCORE_CLIP));
        if score <= threshold {
            continue;
        }
        let Some(r) = regressors.get(i * BLAZEFACE_REGRESSOR_LEN..(i + 1) * BLAZEFACE_REGRESSOR_LEN)
        else {
            continue;
        };

        // Offsets are in input pixels; anchors are normalized.
        let to_canvas = |dx: f32, dy: f32| {
            ((dx / input_size + ax) * input_size, (dy / input_size + ay) * input_size)
        };
        let (cx, cy) = to_canvas(r[0], r[1]);
        let (w, h) = (r[2], r[3]);
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

        let keypoint = |k: usize| {
            let (x, y) = to_canvas(r[4 + k * 2], r[5 + k * 2]);
            letterbox.to_source(x, y)
        };

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks: Some(Landmarks {
                left_eye: keypoint(0),
                right_eye: keypoint(1),
                nose: Some(keypoint(2)),
                mouth_left: None,
                mouth_right: None,
            }),
        });
    }

    detections
}
