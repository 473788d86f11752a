use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("failed to read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write image {path}: {source}")]
    Save {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid label font: {0}")]
    Font(#[from] ab_glyph::InvalidFont),
    #[error(
        "face could not be detected in {0}; confirm that the picture shows a face \
         or disable enforce detection"
    )]
    NoFaceDetected(String),
    #[error("database directory not found: {0}")]
    DatabaseNotFound(String),
    #[error("no .jpg, .jpeg or .png images found in {0}")]
    EmptyDatabase(String),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("representation cache: {0}")]
    Cache(#[from] serde_json::Error),
    #[error("walking database: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
