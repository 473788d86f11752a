//! faceverify-core — face verification and search.
//!
//! Detects faces with one of several ONNX detectors (YuNet, SCRFD, SSD,
//! BlazeFace), embeds them with a Keras-exported recognition model, and
//! compares embeddings by cosine or euclidean distance. Database searches
//! are backed by an on-disk embedding cache kept next to the images.

pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod engine;
pub mod error;
pub mod imaging;
pub mod models;
pub mod recognizer;
pub mod store;
pub mod types;

pub use engine::{EngineOptions, FaceEngine, FaceMatches, FindMatch, VerifyResult};
pub use error::{Error, Result};
pub use models::{DetectorBackend, DistanceMetric, Normalization, RecognitionModel};
pub use store::{RepresentationStore, SyncReport};
pub use types::{BoundingBox, Embedding, FacialArea, Landmarks};
