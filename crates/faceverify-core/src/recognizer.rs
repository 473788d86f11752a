//! Face recognizer via ONNX Runtime.
//!
//! Extracts embeddings from aligned face crops for any of the supported
//! recognition models. Models are Keras exports: NHWC input, BGR channel order.

use crate::alignment;
use crate::imaging::{self, ChannelOrder, TensorLayout};
use crate::models::{Normalization, RecognitionModel};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — place the recognition ONNX file in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Strategy for turning a detected face into an embedding.
pub trait FaceEmbedder {
    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
        align: bool,
    ) -> Result<Embedding, RecognizerError>;
}

/// ONNX-backed recognizer for one [`RecognitionModel`].
pub struct FaceRecognizer {
    session: Session,
    model: RecognitionModel,
    normalization: Normalization,
}

impl FaceRecognizer {
    /// Load `model` from `model_dir`.
    pub fn load(
        model: RecognitionModel,
        model_dir: &Path,
        normalization: Normalization,
        intra_threads: usize,
    ) -> Result<Self, RecognizerError> {
        let model_path = model_dir.join(model.file_name());
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(&model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %model,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self {
            session,
            model,
            normalization,
        })
    }

    /// Bring the face to the model's input size: landmark alignment when
    /// requested and available, otherwise a padded crop of the box.
    fn face_crop(&self, image: &RgbImage, face: &BoundingBox, align: bool) -> RgbImage {
        let (w, h) = self.model.input_size();
        match (&face.landmarks, align) {
            (Some(landmarks), true) => alignment::align_face(image, landmarks, w, h),
            _ => alignment::crop_face(image, face, w, h),
        }
    }
}

impl FaceEmbedder for FaceRecognizer {
    fn embed(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
        align: bool,
    ) -> Result<Embedding, RecognizerError> {
        let crop = self.face_crop(image, face, align);
        let input = preprocess(&crop, self.normalization)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let expected = self.model.embedding_dim();
        if raw.len() != expected {
            return Err(RecognizerError::InferenceFailed(format!(
                "{} expected {expected}-dim embedding, got {}",
                self.model,
                raw.len()
            )));
        }

        let embedding = Embedding {
            values: raw.to_vec(),
            model: Some(self.model.to_string()),
        };
        Ok(if self.model.normalizes_output() {
            embedding.l2_normalized()
        } else {
            embedding
        })
    }
}

/// Pack an aligned face crop into a normalized NHWC BGR tensor.
fn preprocess(
    face: &RgbImage,
    normalization: Normalization,
) -> Result<Array4<f32>, RecognizerError> {
    let mut tensor = imaging::to_tensor(face, TensorLayout::Nhwc, ChannelOrder::Bgr, |v, _| v);
    let values = tensor.as_slice_mut().ok_or_else(|| {
        RecognizerError::InferenceFailed("face tensor is not contiguous".into())
    })?;
    normalization.apply(values);
    Ok(tensor)
}
