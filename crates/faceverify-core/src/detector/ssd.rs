//! OpenCV res10 SSD face detector (the `ssd` backend).
//!
//! Single output of shape `[1, 1, N, 7]`, rows laid out as
//! `[image_id, label, confidence, x1, y1, x2, y2]` with coordinates
//! normalized to the input. No landmarks.

use super::{finalize, open_session, DetectorError, DetectorOptions, FaceDetect};
use crate::imaging::{self, ChannelOrder, TensorLayout};
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SSD_INPUT_SIZE: u32 = 300;
/// Per-channel means in B, G, R order.
const SSD_MEANS: [f32; 3] = [104.0, 177.0, 123.0];
const SSD_ROW_LEN: usize = 7;

pub struct SsdDetector {
    session: Session,
    options: DetectorOptions,
}

impl SsdDetector {
    pub fn load(model_path: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        let session = open_session(model_path, options.intra_threads, "SSD")?;
        Ok(Self { session, options })
    }
}

impl FaceDetect for SsdDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        // The res10 network is trained on stretched (not letterboxed) input.
        let resized = imageops::resize(image, SSD_INPUT_SIZE, SSD_INPUT_SIZE, FilterType::Triangle);
        let input = imaging::to_tensor(&resized, TensorLayout::Nchw, ChannelOrder::Bgr, |v, c| {
            v - SSD_MEANS[c]
        });

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, rows) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;

        let detections = decode_rows(
            rows,
            image.width(),
            image.height(),
            self.options.confidence_threshold,
        );
        let faces = finalize(detections, image.width(), image.height(), self.options.nms_threshold);
        tracing::debug!(count = faces.len(), "SSD detections");
        Ok(faces)
    }
}

fn decode_rows(rows: &[f32], width: u32, height: u32, threshold: f32) -> Vec<BoundingBox> {
    let (w, h) = (width as f32, height as f32);
    rows.chunks_exact(SSD_ROW_LEN)
        .filter(|r| r[2] > threshold)
        .map(|r| {
            let (x1, y1, x2, y2) = (r[3] * w, r[4] * h, r[5] * w, r[6] * h);
            BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: r[2],
                landmarks: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rows_scales_to_image() {
        let rows = [
            0.0, 1.0, 0.95, 0.25, 0.5, 0.75, 1.0, // kept
            0.0, 1.0, 0.20, 0.0, 0.0, 0.1, 0.1, // below threshold
        ];
        let dets = decode_rows(&rows, 200, 100, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (50.0, 50.0, 100.0, 50.0));
        assert!(d.landmarks.is_none());
    }

    #[test]
    fn test_decode_rows_ignores_trailing_partial_row() {
        let rows = [0.0, 1.0, 0.9, 0.0, 0.0, 0.5, 0.5, 0.0, 1.0];
        assert_eq!(decode_rows(&rows, 10, 10, 0.5).len(), 1);
    }
}
