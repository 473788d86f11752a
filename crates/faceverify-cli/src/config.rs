use faceverify_core::detector::DetectorOptions;
use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the detector and recognizer ONNX files.
    pub model_dir: PathBuf,
    /// Minimum detector score for a face to be kept.
    pub detection_confidence: f32,
    /// IoU above which overlapping detections are suppressed.
    pub nms_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `FACEVERIFY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = DetectorOptions::default();
        Self {
            model_dir: std::env::var("FACEVERIFY_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_model_dir()),
            detection_confidence: env_f32(
                "FACEVERIFY_DETECTION_CONFIDENCE",
                defaults.confidence_threshold,
            ),
            nms_threshold: env_f32("FACEVERIFY_NMS_THRESHOLD", defaults.nms_threshold),
            intra_threads: env_usize("FACEVERIFY_INTRA_THREADS", defaults.intra_threads),
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.detection_confidence,
            nms_threshold: self.nms_threshold,
            intra_threads: self.intra_threads,
        }
    }
}

fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceverify/models")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_fallbacks() {
        assert_eq!(env_f32("FACEVERIFY_TEST_UNSET_F32", 0.25), 0.25);
        assert_eq!(env_usize("FACEVERIFY_TEST_UNSET_USIZE", 3), 3);
    }

    #[test]
    fn test_detector_options_from_config() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            detection_confidence: 0.7,
            nms_threshold: 0.3,
            intra_threads: 4,
        };
        let options = config.detector_options();
        assert_eq!(options.confidence_threshold, 0.7);
        assert_eq!(options.nms_threshold, 0.3);
        assert_eq!(options.intra_threads, 4);
    }
}
