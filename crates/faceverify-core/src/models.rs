//! Model, detector, metric and normalization choices.
//!
//! Every enum here displays and serializes as the exact spelling used on the
//! command line and in cache file names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Face recognition model used to produce embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum RecognitionModel {
    #[serde(rename = "VGG-Face")]
    #[cfg_attr(feature = "clap", value(name = "VGG-Face"))]
    VggFace,
    #[serde(rename = "Facenet")]
    #[cfg_attr(feature = "clap", value(name = "Facenet"))]
    Facenet,
    #[serde(rename = "Facenet512")]
    #[cfg_attr(feature = "clap", value(name = "Facenet512"))]
    Facenet512,
    #[serde(rename = "OpenFace")]
    #[cfg_attr(feature = "clap", value(name = "OpenFace"))]
    OpenFace,
    #[serde(rename = "DeepFace")]
    #[cfg_attr(feature = "clap", value(name = "DeepFace"))]
    DeepFace,
    #[serde(rename = "ArcFace")]
    #[cfg_attr(feature = "clap", value(name = "ArcFace"))]
    ArcFace,
}

impl RecognitionModel {
    pub const ALL: [RecognitionModel; 6] = [
        Self::VggFace,
        Self::Facenet,
        Self::Facenet512,
        Self::OpenFace,
        Self::DeepFace,
        Self::ArcFace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::VggFace => "VGG-Face",
            Self::Facenet => "Facenet",
            Self::Facenet512 => "Facenet512",
            Self::OpenFace => "OpenFace",
            Self::DeepFace => "DeepFace",
            Self::ArcFace => "ArcFace",
        }
    }

    /// ONNX file expected in the model directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::VggFace => "vgg_face.onnx",
            Self::Facenet => "facenet128.onnx",
            Self::Facenet512 => "facenet512.onnx",
            Self::OpenFace => "openface.onnx",
            Self::DeepFace => "deepface.onnx",
            Self::ArcFace => "arcface.onnx",
        }
    }

    /// Network input as (width, height).
    pub fn input_size(self) -> (u32, u32) {
        match self {
            Self::VggFace => (224, 224),
            Self::Facenet | Self::Facenet512 => (160, 160),
            Self::OpenFace => (96, 96),
            Self::DeepFace => (152, 152),
            Self::ArcFace => (112, 112),
        }
    }

    pub fn embedding_dim(self) -> usize {
        match self {
            Self::VggFace | Self::DeepFace => 4096,
            Self::Facenet | Self::OpenFace => 128,
            Self::Facenet512 | Self::ArcFace => 512,
        }
    }

    /// VGG-Face ends in an L2 normalization layer; its thresholds assume
    /// unit-length embeddings.
    pub fn normalizes_output(self) -> bool {
        matches!(self, Self::VggFace)
    }

    /// Tuned decision threshold for this model under `metric`.
    pub fn threshold(self, metric: DistanceMetric) -> f32 {
        use DistanceMetric::*;
        match (self, metric) {
            (Self::VggFace, Cosine) => 0.68,
            (Self::VggFace, Euclidean) => 1.17,
            (Self::VggFace, EuclideanL2) => 1.17,
            (Self::Facenet, Cosine) => 0.40,
            (Self::Facenet, Euclidean) => 10.0,
            (Self::Facenet, EuclideanL2) => 0.80,
            (Self::Facenet512, Cosine) => 0.30,
            (Self::Facenet512, Euclidean) => 23.56,
            (Self::Facenet512, EuclideanL2) => 1.04,
            (Self::OpenFace, Cosine) => 0.10,
            (Self::OpenFace, Euclidean) => 0.55,
            (Self::OpenFace, EuclideanL2) => 0.55,
            (Self::DeepFace, Cosine) => 0.23,
            (Self::DeepFace, Euclidean) => 64.0,
            (Self::DeepFace, EuclideanL2) => 0.64,
            (Self::ArcFace, Cosine) => 0.68,
            (Self::ArcFace, Euclidean) => 4.15,
            (Self::ArcFace, EuclideanL2) => 1.13,
        }
    }
}

impl fmt::Display for RecognitionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Face localization backend run before embedding extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum DetectorBackend {
    /// YuNet, the detector behind OpenCV's `FaceDetectorYN`.
    Opencv,
    /// OpenCV's res10 300x300 SSD.
    Ssd,
    Dlib,
    Mtcnn,
    /// SCRFD, InsightFace's successor to RetinaFace.
    Retinaface,
    /// MediaPipe BlazeFace short-range.
    Mediapipe,
    /// No detection: the whole image is the face.
    Skip,
}

impl DetectorBackend {
    pub const ALL: [DetectorBackend; 7] = [
        Self::Opencv,
        Self::Ssd,
        Self::Dlib,
        Self::Mtcnn,
        Self::Retinaface,
        Self::Mediapipe,
        Self::Skip,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Opencv => "opencv",
            Self::Ssd => "ssd",
            Self::Dlib => "dlib",
            Self::Mtcnn => "mtcnn",
            Self::Retinaface => "retinaface",
            Self::Mediapipe => "mediapipe",
            Self::Skip => "skip",
        }
    }

    /// ONNX file expected in the model directory, if the backend runs one.
    pub fn file_name(self) -> Option<&'static str> {
        match self {
            Self::Opencv => Some("face_detection_yunet_2023mar.onnx"),
            Self::Ssd => Some("res10_300x300_ssd.onnx"),
            Self::Retinaface => Some("det_10g.onnx"),
            Self::Mediapipe => Some("blazeface_short_range.onnx"),
            Self::Dlib | Self::Mtcnn | Self::Skip => None,
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dissimilarity measure between two embeddings. Lower means more alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(feature = "clap", value(rename_all = "snake_case"))]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [Self::Cosine, Self::Euclidean, Self::EuclideanL2];

    pub fn name(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel normalization applied to the aligned face before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Normalization {
    /// Scale to [0, 1].
    #[default]
    #[serde(rename = "base")]
    #[cfg_attr(feature = "clap", value(name = "base"))]
    Base,
    /// Leave pixels in [0, 255].
    #[serde(rename = "raw")]
    #[cfg_attr(feature = "clap", value(name = "raw"))]
    Raw,
    /// Per-image standardization.
    #[serde(rename = "Facenet")]
    #[cfg_attr(feature = "clap", value(name = "Facenet"))]
    Facenet,
    /// Scale to [-1, 1].
    #[serde(rename = "Facenet2018")]
    #[cfg_attr(feature = "clap", value(name = "Facenet2018"))]
    Facenet2018,
    /// Subtract the VGGFace channel means.
    #[serde(rename = "VGGFace")]
    #[cfg_attr(feature = "clap", value(name = "VGGFace"))]
    VggFace,
    /// Subtract the VGGFace2 channel means.
    #[serde(rename = "VGGFace2")]
    #[cfg_attr(feature = "clap", value(name = "VGGFace2"))]
    VggFace2,
    /// (x - 127.5) / 128.
    #[serde(rename = "ArcFace")]
    #[cfg_attr(feature = "clap", value(name = "ArcFace"))]
    ArcFace,
}

// Channel means in B, G, R order.
const VGGFACE_MEANS: [f32; 3] = [93.5940, 104.7624, 129.1863];
const VGGFACE2_MEANS: [f32; 3] = [91.4953, 103.8827, 131.0912];

impl Normalization {
    pub const ALL: [Normalization; 7] = [
        Self::Base,
        Self::Raw,
        Self::Facenet,
        Self::Facenet2018,
        Self::VggFace,
        Self::VggFace2,
        Self::ArcFace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Raw => "raw",
            Self::Facenet => "Facenet",
            Self::Facenet2018 => "Facenet2018",
            Self::VggFace => "VGGFace",
            Self::VggFace2 => "VGGFace2",
            Self::ArcFace => "ArcFace",
        }
    }

    /// Normalize interleaved BGR pixel values in [0, 255] in place.
    pub fn apply(self, bgr: &mut [f32]) {
        match self {
            Self::Raw => {}
            Self::Base => bgr.iter_mut().for_each(|v| *v /= 255.0),
            Self::Facenet2018 => bgr.iter_mut().for_each(|v| *v = *v / 127.5 - 1.0),
            Self::ArcFace => bgr.iter_mut().for_each(|v| *v = (*v - 127.5) / 128.0),
            Self::VggFace => subtract_means(bgr, VGGFACE_MEANS),
            Self::VggFace2 => subtract_means(bgr, VGGFACE2_MEANS),
            Self::Facenet => {
                if bgr.is_empty() {
                    return;
                }
                let n = bgr.len() as f32;
                let mean = bgr.iter().sum::<f32>() / n;
                let var = bgr.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
                let std = if var > 0.0 { var.sqrt() } else { 1.0 };
                bgr.iter_mut().for_each(|v| *v = (*v - mean) / std);
            }
        }
    }
}

fn subtract_means(bgr: &mut [f32], means: [f32; 3]) {
    for px in bgr.chunks_exact_mut(3) {
        for (v, m) in px.iter_mut().zip(means) {
            *v -= m;
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
