//! Verification and search on top of a detector and an embedder.

use crate::detector::{self, DetectorOptions, FaceDetect};
use crate::error::{Error, Result};
use crate::imaging;
use crate::models::{DetectorBackend, DistanceMetric, Normalization, RecognitionModel};
use crate::recognizer::{FaceEmbedder, FaceRecognizer};
use crate::store::RepresentationStore;
use crate::types::{BoundingBox, Embedding, FacialArea};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// How faces are detected, embedded and compared.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub model: RecognitionModel,
    pub detector: DetectorBackend,
    pub metric: DistanceMetric,
    pub normalization: Normalization,
    /// Align faces on their landmarks before embedding.
    pub align: bool,
    /// Fail when no face is found instead of embedding the whole image.
    pub enforce_detection: bool,
    /// Overrides the model's tuned threshold.
    pub threshold: Option<f32>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model: RecognitionModel::VggFace,
            detector: DetectorBackend::Opencv,
            metric: DistanceMetric::Cosine,
            normalization: Normalization::Base,
            align: true,
            enforce_detection: true,
            threshold: None,
        }
    }
}

impl EngineOptions {
    /// Decision threshold: the override if set, else the model's tuned value.
    pub fn threshold(&self) -> f32 {
        self.threshold.unwrap_or_else(|| self.model.threshold(self.metric))
    }
}

/// One face of one image with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub facial_area: FacialArea,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyFacialAreas {
    pub img1: FacialArea,
    pub img2: FacialArea,
}

/// Outcome of comparing two images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
    pub model: RecognitionModel,
    pub detector_backend: DetectorBackend,
    pub similarity_metric: DistanceMetric,
    pub facial_areas: VerifyFacialAreas,
    /// Wall-clock seconds spent on the comparison.
    pub time: f64,
}

/// A database face within the threshold of a query face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindMatch {
    /// Path of the matching database image.
    pub identity: String,
    /// SHA-256 of the database image.
    pub hash: String,
    /// Face region in the database image.
    pub target: FacialArea,
    /// Face region in the query image.
    pub source: FacialArea,
    pub threshold: f32,
    pub distance: f32,
    /// How far below the threshold the distance is, in percent.
    pub confidence: f32,
}

/// All matches for one face of the query image, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatches {
    pub source: FacialArea,
    pub matches: Vec<FindMatch>,
}

impl FaceMatches {
    pub fn best(&self) -> Option<&FindMatch> {
        self.matches.first()
    }
}

pub struct FaceEngine {
    detector: Box<dyn FaceDetect>,
    embedder: Box<dyn FaceEmbedder>,
    options: EngineOptions,
}

impl FaceEngine {
    pub fn new(
        detector: Box<dyn FaceDetect>,
        embedder: Box<dyn FaceEmbedder>,
        options: EngineOptions,
    ) -> Self {
        Self {
            detector,
            embedder,
            options,
        }
    }

    /// Load the detector and recognizer models named by `options` from `model_dir`.
    pub fn load(
        model_dir: &Path,
        options: EngineOptions,
        detector_options: DetectorOptions,
    ) -> Result<Self> {
        let detector = detector::load_detector(options.detector, model_dir, detector_options)?;
        let recognizer = FaceRecognizer::load(
            options.model,
            model_dir,
            options.normalization,
            detector_options.intra_threads,
        )?;
        tracing::info!(
            model = %options.model,
            detector = %options.detector,
            metric = %options.metric,
            "engine ready"
        );
        Ok(Self::new(detector, Box::new(recognizer), options))
    }

    /// Detect and embed every face in `image`.
    ///
    /// `label` names the image in errors. Without a detectable face this fails
    /// with [`Error::NoFaceDetected`] when detection is enforced, otherwise the
    /// whole image is embedded as a single face.
    pub fn represent(&mut self, image: &RgbImage, label: &str) -> Result<Vec<Representation>> {
        let mut faces = self.detector.detect(image)?;
        if faces.is_empty() {
            if self.options.enforce_detection {
                return Err(Error::NoFaceDetected(label.to_string()));
            }
            tracing::debug!(image = label, "no face detected, using whole image");
            faces.push(BoundingBox::whole_image(image.width(), image.height()));
        }

        let align = self.options.align;
        faces
            .iter()
            .map(|face| {
                let embedding = self.embedder.embed(image, face, align)?;
                Ok(Representation {
                    facial_area: face.facial_area(),
                    embedding,
                })
            })
            .collect()
    }

    /// Load and represent an image file.
    pub fn represent_path(&mut self, path: &Path) -> Result<Vec<Representation>> {
        let image = imaging::load_image(path)?;
        self.represent(&image, &path.display().to_string())
    }

    /// Decide whether two images show the same person.
    ///
    /// Every face of one image is compared to every face of the other; the
    /// closest pair decides.
    pub fn verify(&mut self, img1: &Path, img2: &Path) -> Result<VerifyResult> {
        let started = Instant::now();
        let reps1 = self.represent_path(img1)?;
        let reps2 = self.represent_path(img2)?;

        let metric = self.options.metric;
        let (distance, a, b) = reps1
            .iter()
            .flat_map(|a| {
                reps2
                    .iter()
                    .map(move |b| (a.embedding.distance(&b.embedding, metric), a, b))
            })
            .min_by(|x, y| x.0.total_cmp(&y.0))
            .ok_or_else(|| Error::NoFaceDetected(img1.display().to_string()))?;

        let threshold = self.options.threshold();
        let result = VerifyResult {
            verified: distance <= threshold,
            distance,
            threshold,
            model: self.options.model,
            detector_backend: self.options.detector,
            similarity_metric: metric,
            facial_areas: VerifyFacialAreas {
                img1: a.facial_area.clone(),
                img2: b.facial_area.clone(),
            },
            time: started.elapsed().as_secs_f64(),
        };

        tracing::info!(
            verified = result.verified,
            distance = result.distance,
            threshold = result.threshold,
            "verification finished"
        );
        Ok(result)
    }

    /// Match every face in `image` against the embeddings held by `store`.
    pub fn find(
        &mut self,
        image: &RgbImage,
        label: &str,
        store: &RepresentationStore,
    ) -> Result<Vec<FaceMatches>> {
        let queries = self.represent(image, label)?;
        let threshold = self.options.threshold();
        let metric = self.options.metric;

        let results: Vec<FaceMatches> = queries
            .into_iter()
            .map(|query| {
                let mut matches: Vec<FindMatch> = store
                    .entries()
                    .iter()
                    .filter_map(|entry| {
                        let embedding = entry.embedding.as_ref()?;
                        let distance = query.embedding.distance(embedding, metric);
                        (distance <= threshold).then(|| FindMatch {
                            identity: store.identity_path(entry).display().to_string(),
                            hash: entry.hash.clone(),
                            target: entry.target.clone().unwrap_or_else(|| query.facial_area.clone()),
                            source: query.facial_area.clone(),
                            threshold,
                            distance,
                            confidence: match_confidence(distance, threshold),
                        })
                    })
                    .collect();
                matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                FaceMatches {
                    source: query.facial_area,
                    matches,
                }
            })
            .collect();

        tracing::info!(
            faces = results.len(),
            matches = results.iter().map(|r| r.matches.len()).sum::<usize>(),
            "search finished"
        );
        Ok(results)
    }
}

fn match_confidence(distance: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 0.0;
    }
    ((1.0 - distance / threshold) * 100.0).clamp(0.0, 100.0)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use image::Rgb;

    fn save(dir: &Path, name: &str, color: [u8; 3]) -> std::path::PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(8, 8, Rgb(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_threshold_override() {
        let mut options = EngineOptions::default();
        assert_eq!(options.threshold(), 0.68);
        options.threshold = Some(0.1);
        assert_eq!(options.threshold(), 0.1);
    }

    #[test]
    fn test_verify_same_color_is_verified() {
        let dir = tempfile::tempdir().unwrap();
        let a = save(dir.path(), "a.png", [200, 10, 10]);
        let b = save(dir.path(), "b.png", [200, 10, 10]);

        let result = engine(EngineOptions::default()).verify(&a, &b).unwrap();
        assert!(result.verified);
        assert!(result.distance.abs() < 1e-6);
        assert_eq!(result.threshold, 0.68);
        assert_eq!(result.facial_areas.img1.w, 8);
    }

    #[test]
    fn test_verify_different_colors_is_not_verified() {
        let dir = tempfile::tempdir().unwrap();
        let a = save(dir.path(), "a.png", [250, 1, 1]);
        let b = save(dir.path(), "b.png", [1, 1, 250]);

        let result = engine(EngineOptions::default()).verify(&a, &b).unwrap();
        assert!(!result.verified);
        assert!(result.distance > result.threshold);
    }

    #[test]
    fn test_verify_uses_closest_face_pair() {
        // Two faces in img1 (left red, right blue), one blue face in img2.
        struct SplitDetector;
        impl FaceDetect for SplitDetector {
            fn detect(
                &mut self,
                image: &RgbImage,
            ) -> std::result::Result<Vec<BoundingBox>, crate::detector::DetectorError> {
                let half = image.width() as f32 / 2.0;
                let h = image.height() as f32;
                Ok(vec![
                    BoundingBox { x: 0.0, y: 0.0, width: half, height: h, confidence: 0.9, landmarks: None },
                    BoundingBox { x: half, y: 0.0, width: half, height: h, confidence: 0.8, landmarks: None },
                ])
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut img = RgbImage::from_pixel(8, 4, Rgb([250, 1, 1]));
        for y in 0..4 {
            for x in 4..8 {
                img.put_pixel(x, y, Rgb([1, 1, 250]));
            }
        }
        let a = dir.path().join("pair.png");
        img.save(&a).unwrap();
        let b = save(dir.path(), "blue.png", [1, 1, 250]);

        let mut engine = FaceEngine::new(
            Box::new(SplitDetector),
            Box::new(ColorEmbedder),
            EngineOptions::default(),
        );
        let result = engine.verify(&a, &b).unwrap();
        assert!(result.verified);
        assert_eq!(result.facial_areas.img1.x, 4);
    }

    #[test]
    fn test_verify_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let a = save(dir.path(), "a.png", [200, 10, 10]);
        let err = engine(EngineOptions::default())
            .verify(&a, &dir.path().join("missing.jpg"))
            .unwrap_err();
        assert!(matches!(err, Error::ImageNotFound(_)), "{err}");
    }

    #[test]
    fn test_represent_enforce_detection() {
        let black = RgbImage::new(4, 4);
        let err = engine(EngineOptions::default()).represent(&black, "black.png").unwrap_err();
        assert!(matches!(err, Error::NoFaceDetected(ref p) if p == "black.png"), "{err}");

        let options = EngineOptions {
            enforce_detection: false,
            ..EngineOptions::default()
        };
        let reps = engine(options).represent(&black, "black.png").unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].facial_area.confidence, 0.0);
    }

    #[test]
    fn test_verify_result_json_fields() {
        let dir = tempfile::tempdir().unwrap();
        let a = save(dir.path(), "a.png", [200, 10, 10]);
        let b = save(dir.path(), "b.png", [200, 10, 10]);
        let result = engine(EngineOptions::default()).verify(&a, &b).unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["verified"], true);
        assert!(json["distance"].is_number());
        assert!(json["threshold"].is_number());
        assert_eq!(json["model"], "VGG-Face");
        assert_eq!(json["detector_backend"], "opencv");
        assert_eq!(json["similarity_metric"], "cosine");
        assert!(json["time"].is_number());
        for key in ["img1", "img2"] {
            let area = &json["facial_areas"][key];
            assert_eq!(area["x"], 0);
            assert_eq!(area["y"], 0);
            assert_eq!(area["w"], 8);
            assert_eq!(area["h"], 8);
            assert!(area["left_eye"].is_null());
            assert!(area["right_eye"].is_null());
            assert!(area["confidence"].is_number());
        }
    }

    #[test]
    fn test_face_matches_json_fields() {
        let area = FacialArea {
            x: 1,
            y: 2,
            w: 3,
            h: 4,
            left_eye: Some((2, 3)),
            right_eye: None,
            confidence: 0.9,
        };
        let results = vec![FaceMatches {
            source: area.clone(),
            matches: vec![FindMatch {
                identity: "db/alice/a.jpg".into(),
                hash: "ab".into(),
                target: area.clone(),
                source: area,
                threshold: 0.68,
                distance: 0.34,
                confidence: 50.0,
            }],
        }];

        let json = serde_json::to_value(&results).unwrap();
        let face = &json[0];
        assert_eq!(face["source"]["w"], 3);
        assert_eq!(face["source"]["left_eye"], serde_json::json!([2, 3]));
        let m = &face["matches"][0];
        assert_eq!(m["identity"], "db/alice/a.jpg");
        assert_eq!(m["hash"], "ab");
        assert_eq!(m["target"]["x"], 1);
        assert_eq!(m["source"]["y"], 2);
        assert!(m["threshold"].is_number());
        assert!(m["distance"].is_number());
        assert_eq!(m["confidence"], 50.0);
    }

    #[test]
    fn test_match_confidence() {
        assert_eq!(match_confidence(0.0, 0.5), 100.0);
        assert_eq!(match_confidence(0.25, 0.5), 50.0);
        assert_eq!(match_confidence(0.7, 0.5), 0.0);
        assert_eq!(match_confidence(0.1, 0.0), 0.0);
    }
}
