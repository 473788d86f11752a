//! Face detection backends.
//!
//! Every backend runs an ONNX model through ONNX Runtime and reports faces in
//! source-image coordinates, sorted by descending confidence.

pub mod blazeface;
pub mod scrfd;
pub mod ssd;
pub mod yunet;

use crate::models::DetectorBackend;
use crate::types::BoundingBox;
use image::RgbImage;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

pub use blazeface::BlazeFaceDetector;
pub use scrfd::ScrfdDetector;
pub use ssd::SsdDetector;
pub use yunet::YuNetDetector;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the detector ONNX file in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error(
        "detector backend '{0}' is not supported; use opencv, ssd, retinaface, mediapipe or skip"
    )]
    UnsupportedBackend(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Strategy for locating faces in an image.
pub trait FaceDetect {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Tuning shared by all detector backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Minimum score for a candidate face.
    pub confidence_threshold: f32,
    /// IoU above which the weaker of two overlapping boxes is dropped.
    pub nms_threshold: f32,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            intra_threads: 2,
        }
    }
}

/// Detection disabled: the whole image is treated as one face.
pub struct WholeImage;

impl FaceDetect for WholeImage {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(vec![BoundingBox::whole_image(image.width(), image.height())])
    }
}

/// Construct the detector for `backend`, loading its model from `model_dir`.
pub fn load_detector(
    backend: DetectorBackend,
    model_dir: &Path,
    options: DetectorOptions,
) -> Result<Box<dyn FaceDetect>, DetectorError> {
    let model_path = |name: &str| model_dir.join(name);

    let detector: Box<dyn FaceDetect> = match (backend, backend.file_name()) {
        (DetectorBackend::Skip, _) => Box::new(WholeImage),
        (DetectorBackend::Retinaface, Some(file)) => {
            Box::new(ScrfdDetector::load(&model_path(file), options)?)
        }
        (DetectorBackend::Opencv, Some(file)) => {
            Box::new(YuNetDetector::load(&model_path(file), options)?)
        }
        (DetectorBackend::Ssd, Some(file)) => Box::new(SsdDetector::load(&model_path(file), options)?),
        (DetectorBackend::Mediapipe, Some(file)) => {
            Box::new(BlazeFaceDetector::load(&model_path(file), options)?)
        }
        (other, _) => return Err(DetectorError::UnsupportedBackend(other.to_string())),
    };

    tracing::debug!(backend = %backend, "detector ready");
    Ok(detector)
}

/// Open an ONNX session, failing early with a readable error when the file is absent.
pub(crate) fn open_session(
    model_path: &Path,
    intra_threads: usize,
    kind: &str,
) -> Result<Session, DetectorError> {
    if !model_path.exists() {
        return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = %model_path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded {kind} model"
    );

    Ok(session)
}

/// Suppress overlaps, clip to the image and order by descending confidence.
pub(crate) fn finalize(
    detections: Vec<BoundingBox>,
    width: u32,
    height: u32,
    nms_threshold: f32,
) -> Vec<BoundingBox> {
    nms(detections, nms_threshold)
        .into_iter()
        .map(|b| b.clamp_to(width, height))
        .filter(|b| b.width >= 1.0 && b.height >= 1.0)
        .collect()
}

/// Non-Maximum Suppression: remove overlapping detections.
pub(crate) fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let detections = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            make_bbox(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_finalize_clips_and_drops_degenerate() {
        let detections = vec![
            make_bbox(-20.0, -20.0, 60.0, 60.0, 0.9),
            make_bbox(500.0, 500.0, 10.0, 10.0, 0.8),
        ];
        let result = finalize(detections, 100, 100, 0.4);
        assert_eq!(result.len(), 1);
        assert_eq!((result[0].x, result[0].y, result[0].width), (0.0, 0.0, 40.0));
    }

    #[test]
    fn test_whole_image_detector() {
        let img = RgbImage::new(64, 48);
        let faces = WholeImage.detect(&img).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!((faces[0].width, faces[0].height), (64.0, 48.0));
        assert_eq!(faces[0].confidence, 0.0);
    }

    #[test]
    fn test_load_detector_unsupported_backends() {
        for backend in [DetectorBackend::Dlib, DetectorBackend::Mtcnn] {
            let err = load_detector(backend, Path::new("/nonexistent"), DetectorOptions::default())
                .err()
                .unwrap();
            assert!(matches!(err, DetectorError::UnsupportedBackend(_)), "{err}");
        }
    }

    #[test]
    fn test_load_detector_missing_model() {
        let err = load_detector(
            DetectorBackend::Retinaface,
            Path::new("/nonexistent"),
            DetectorOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)), "{err}");
    }

    #[test]
    fn test_load_detector_skip_needs_no_model() {
        let mut det =
            load_detector(DetectorBackend::Skip, Path::new("/nonexistent"), DetectorOptions::default())
                .unwrap();
        assert_eq!(det.detect(&RgbImage::new(4, 4)).unwrap().len(), 1);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(20.0) > 0.999);
    }
}
