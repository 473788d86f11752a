//! YuNet face detector (the `opencv` backend).
//!
//! YuNet is the network behind OpenCV's `FaceDetectorYN`. The 2023 export has
//! one anchor per cell and separate classification / objectness heads per
//! stride, named `cls_8`, `obj_8`, `bbox_8`, `kps_8`, ...

use super::{finalize, open_session, DetectorError, DetectorOptions, FaceDetect};
use crate::imaging::{self, ChannelOrder, Letterbox, TensorLayout};
use crate::types::{BoundingBox, Landmarks};
use image::{Rgb, RgbImage};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const YUNET_INPUT_SIZE: u32 = 640;
const YUNET_STRIDES: [usize; 3] = [8, 16, 32];

/// Output indices for one stride: (cls, obj, bbox, kps).
type HeadIndices = (usize, usize, usize, usize);

pub struct YuNetDetector {
    session: Session,
    options: DetectorOptions,
    heads: [HeadIndices; 3],
}

impl YuNetDetector {
    pub fn load(model_path: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        let session = open_session(model_path, options.intra_threads, "YuNet")?;
        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let heads = find_heads(&names).ok_or_else(|| {
            DetectorError::InferenceFailed(format!(
                "YuNet model must expose cls/obj/bbox/kps outputs for strides 8, 16 and 32, got {names:?}"
            ))
        })?;
        Ok(Self { session, options, heads })
    }
}

impl FaceDetect for YuNetDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (canvas, letterbox) =
            imaging::letterbox(image, YUNET_INPUT_SIZE, YUNET_INPUT_SIZE, Rgb([0, 0, 0]));
        // YuNet consumes raw BGR values.
        let input = imaging::to_tensor(&canvas, TensorLayout::Nchw, ChannelOrder::Bgr, |v, _| v);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (pos, &stride) in YUNET_STRIDES.iter().enumerate() {
            let (cls_idx, obj_idx, bbox_idx, kps_idx) = self.heads[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let heads = StrideHeads {
                cls: extract(cls_idx, "cls")?,
                obj: extract(obj_idx, "obj")?,
                bbox: extract(bbox_idx, "bbox")?,
                kps: extract(kps_idx, "kps")?,
            };
            all_detections.extend(decode_stride(
                &heads,
                stride,
                YUNET_INPUT_SIZE as usize,
                &letterbox,
                self.options.confidence_threshold,
            ));
        }

        let faces = finalize(
            all_detections,
            image.width(),
            image.height(),
            self.options.nms_threshold,
        );
        tracing::debug!(count = faces.len(), "YuNet detections");
        Ok(faces)
    }
}

fn find_heads(names: &[String]) -> Option<[HeadIndices; 3]> {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };
    let mut heads = [(0, 0, 0, 0); 3];
    for (slot, &stride) in heads.iter_mut().zip(YUNET_STRIDES.iter()) {
        *slot = (
            find("cls", stride)?,
            find("obj", stride)?,
            find("bbox", stride)?,
            find("kps", stride)?,
        );
    }
    Some(heads)
}

struct StrideHeads<'a> {
    cls: &'a [f32],
    obj: &'a [f32],
    bbox: &'a [f32],
    kps: &'a [f32],
}

fn decode_stride(
    heads: &StrideHeads<'_>,
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let s = stride as f32;
    let mut detections = Vec::new();

    for idx in 0..grid * grid {
        let cls = heads.cls.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let obj = heads.obj.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let score = (cls * obj).sqrt();
        if score <= threshold {
            continue;
        }

        let col = (idx % grid) as f32;
        let row = (idx / grid) as f32;

        let Some(b) = heads.bbox.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let cx = (col + b[0]) * s;
        let cy = (row + b[1]) * s;
        let w = b[2].exp() * s;
        let h = b[3].exp() * s;
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

        let landmarks = heads.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            let mut pts = [(0.0f32, 0.0f32); 5];
            for (i, pt) in pts.iter_mut().enumerate() {
                *pt = letterbox.to_source((k[i * 2] + col) * s, (k[i * 2 + 1] + row) * s);
            }
            Landmarks::five(pts)
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_heads() {
        let mut names = Vec::new();
        for prefix in ["cls", "obj", "bbox", "kps"] {
            for stride in YUNET_STRIDES {
                names.push(format!("{prefix}_{stride}"));
            }
        }
        let heads = find_heads(&names).unwrap();
        assert_eq!(heads[0], (0, 3, 6, 9));
        assert_eq!(heads[2], (2, 5, 8, 11));
    }

    #[test]
    fn test_find_heads_missing() {
        let names: Vec<String> = (0..12).map(|i: usize| i.to_string()).collect();
        assert!(find_heads(&names).is_none());
    }

    #[test]
    fn test_decode_stride_center_and_size() {
        // 64px input with stride 32 -> 2x2 grid, one anchor per cell.
        let cls = [0.0, 0.0, 0.81, 0.0];
        let obj = [0.0, 0.0, 1.0, 0.0];
        let mut bbox = vec![0.0f32; 16];
        // Cell 2 = (col 0, row 1); offset half a cell, size exp(0) * 32.
        bbox[8..12].copy_from_slice(&[0.5, 0.5, 0.0, 0.0]);
        let kps = vec![0.5f32; 40];

        let heads = StrideHeads { cls: &cls, obj: &obj, bbox: &bbox, kps: &kps };
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&heads, 32, 64, &lb, 0.5);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.confidence - 0.9).abs() < 1e-5);
        assert_eq!((d.x, d.y, d.width, d.height), (0.0, 32.0, 32.0, 32.0));
        assert_eq!(d.landmarks.unwrap().left_eye, (16.0, 48.0));
    }
}
