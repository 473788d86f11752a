use crate::models::DistanceMetric;
use serde::{Deserialize, Serialize};

/// Facial keypoints in image coordinates.
///
/// Left and right are as seen in the image, not from the subject's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose: Option<(f32, f32)>,
    pub mouth_left: Option<(f32, f32)>,
    pub mouth_right: Option<(f32, f32)>,
}

impl Landmarks {
    /// Build from the five-point layout: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub fn five(points: [(f32, f32); 5]) -> Self {
        Self {
            left_eye: points[0],
            right_eye: points[1],
            nose: Some(points[2]),
            mouth_left: Some(points[3]),
            mouth_right: Some(points[4]),
        }
    }

    /// Available points paired with their index in the five-point layout.
    pub fn indexed_points(&self) -> Vec<(usize, (f32, f32))> {
        let mut pts = vec![(0, self.left_eye), (1, self.right_eye)];
        pts.extend(self.nose.map(|p| (2, p)));
        pts.extend(self.mouth_left.map(|p| (3, p)));
        pts.extend(self.mouth_right.map(|p| (4, p)));
        pts
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

impl BoundingBox {
    /// A box covering the whole image, as used when detection is skipped.
    pub fn whole_image(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            confidence: 0.0,
            landmarks: None,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Clip the box to an image of the given size. Landmarks are left untouched.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        let x1 = self.x.clamp(0.0, w);
        let y1 = self.y.clamp(0.0, h);
        let x2 = (self.x + self.width).clamp(0.0, w);
        let y2 = (self.y + self.height).clamp(0.0, h);
        BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: self.confidence,
            landmarks: self.landmarks,
        }
    }

    pub fn facial_area(&self) -> FacialArea {
        let px = |v: f32| v.max(0.0).round() as u32;
        let point = |(x, y): (f32, f32)| (px(x), px(y));
        FacialArea {
            x: px(self.x),
            y: px(self.y),
            w: px(self.width),
            h: px(self.height),
            left_eye: self.landmarks.map(|l| point(l.left_eye)),
            right_eye: self.landmarks.map(|l| point(l.right_eye)),
            confidence: self.confidence,
        }
    }
}

/// Face region as reported to users and stored in the representation cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacialArea {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub left_eye: Option<(u32, u32)>,
    pub right_eye: Option<(u32, u32)>,
    /// Detector confidence; 0 when the whole image was used.
    pub confidence: f32,
}

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "ArcFace").
    pub model: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model: None }
    }

    /// Cosine similarity in [-1, 1]. Zero vectors are treated as orthogonal.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Copy scaled to unit length; zero vectors are returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding { values, model: self.model.clone() }
    }

    /// Distance under `metric`. Lower means more similar.
    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => 1.0 - self.similarity(other),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::EuclideanL2 => self
                .l2_normalized()
                .euclidean_distance(&other.l2_normalized()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn make_bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0, landmarks: None }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_distances_identical_are_zero() {
        let a = emb(&[0.3, -1.2, 4.0]);
        for metric in DistanceMetric::ALL {
            assert!(a.distance(&a, metric).abs() < 1e-5, "{metric}");
        }
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let d = emb(&[1.0, 0.0]).distance(&emb(&[-1.0, 0.0]), DistanceMetric::Cosine);
        assert!((d - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_vs_l2() {
        let a = emb(&[3.0, 0.0]);
        let b = emb(&[0.0, 4.0]);
        assert!((a.distance(&b, DistanceMetric::Euclidean) - 5.0).abs() < 1e-6);
        // Unit vectors at 90 degrees are sqrt(2) apart.
        let l2 = a.distance(&b, DistanceMetric::EuclideanL2);
        assert!((l2 - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalized_keeps_zero() {
        let z = emb(&[0.0, 0.0]).l2_normalized();
        assert_eq!(z.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_to_image() {
        let b = make_bbox(-10.0, 5.0, 50.0, 200.0).clamp_to(30, 100);
        assert_eq!((b.x, b.y, b.width, b.height), (0.0, 5.0, 30.0, 95.0));
    }

    #[test]
    fn test_facial_area_rounds_and_carries_eyes() {
        let mut b = make_bbox(10.4, 20.6, 30.0, 40.0);
        b.landmarks = Some(Landmarks::five([
            (15.2, 30.0),
            (30.7, 30.0),
            (22.0, 40.0),
            (17.0, 50.0),
            (28.0, 50.0),
        ]));
        let area = b.facial_area();
        assert_eq!((area.x, area.y, area.w, area.h), (10, 21, 30, 40));
        assert_eq!(area.left_eye, Some((15, 30)));
        assert_eq!(area.right_eye, Some((31, 30)));
    }

    #[test]
    fn test_indexed_points_eyes_only() {
        let l = Landmarks {
            left_eye: (1.0, 2.0),
            right_eye: (3.0, 4.0),
            nose: None,
            mouth_left: None,
            mouth_right: None,
        };
        assert_eq!(l.indexed_points(), vec![(0, (1.0, 2.0)), (1, (3.0, 4.0))]);
    }
}
