//! Face-matching capability.
//!
//! The comparison pipeline only sees [`FaceMatcher`]: two image paths and a
//! [`MatchConfig`] in, a distance plus the matcher's own decision threshold
//! out. [`OnnxFaceMatcher`] is the shipped implementation (SCRFD detection,
//! landmark alignment, ArcFace embeddings).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alignment;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("could not read image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face detected in {0}")]
    NoFaceDetected(PathBuf),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
    #[error("{metric} distance is not a finite number")]
    NonFiniteDistance { metric: DistanceMetric },
}

/// Embedding model used to turn a face crop into a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingModel {
    ArcFace,
}

/// Face detector used to locate and crop faces before embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    Scrfd,
}

/// Distance between two embeddings; smaller means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArcFace => f.write_str("ArcFace"),
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scrfd => f.write_str("scrfd"),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::Euclidean => f.write_str("euclidean"),
            Self::EuclideanL2 => f.write_str("euclidean_l2"),
        }
    }
}

impl DistanceMetric {
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            Self::Cosine => a.cosine_distance(b),
            Self::Euclidean => a.euclidean_distance(b),
            Self::EuclideanL2 => a.euclidean_l2_distance(b),
        }
    }
}

/// Recommended same-identity boundary for a model/metric pair.
pub fn recommended_threshold(model: EmbeddingModel, metric: DistanceMetric) -> f64 {
    match (model, metric) {
        (EmbeddingModel::ArcFace, DistanceMetric::Cosine) => 0.68,
        (EmbeddingModel::ArcFace, DistanceMetric::Euclidean) => 4.15,
        (EmbeddingModel::ArcFace, DistanceMetric::EuclideanL2) => 1.13,
    }
}

/// Options passed to the matcher for one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub model: EmbeddingModel,
    pub detector: DetectorBackend,
    pub metric: DistanceMetric,
    /// When false, an image without a confident detection is still compared
    /// best-effort instead of failing.
    pub enforce_detection: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingModel::ArcFace,
            detector: DetectorBackend::Scrfd,
            metric: DistanceMetric::Cosine,
            enforce_detection: false,
        }
    }
}

impl MatchConfig {
    /// Human-readable label for the model/detector/metric combination.
    pub fn method_label(&self) -> String {
        format!("{} + {} ({})", self.model, self.detector, self.metric)
    }
}

/// Raw output of one verification.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Non-negative; smaller means more similar.
    pub distance: f64,
    /// Matcher's recommended decision boundary for the model and metric used.
    pub threshold: f64,
    pub model: EmbeddingModel,
    pub detector: DetectorBackend,
    pub metric: DistanceMetric,
    /// Whether a face was confidently detected in each image (img1, img2).
    pub faces_detected: (bool, bool),
}

/// Opaque face-verification capability.
pub trait FaceMatcher: Send + Sync {
    /// Compare the faces in two image files.
    fn verify(&self, img1: &Path, img2: &Path, config: &MatchConfig) -> Result<MatchResult, MatchError>;

    /// Run a throwaway inference so the first real request is not the slow one.
    fn warm_up(&self) -> Result<(), MatchError> {
        Ok(())
    }
}

/// SCRFD + ArcFace matcher backed by ONNX Runtime sessions.
///
/// Sessions need exclusive access to run, so each sits behind a mutex.
pub struct OnnxFaceMatcher {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxFaceMatcher {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        }
    }

    /// Load both models from disk.
    pub fn load(
        detector_path: &Path,
        recognizer_path: &Path,
        intra_threads: usize,
    ) -> Result<Self, MatchError> {
        let detector = FaceDetector::load(detector_path, intra_threads)?;
        let recognizer = FaceRecognizer::load(recognizer_path, intra_threads)?;
        Ok(Self::new(detector, recognizer))
    }

    fn embed(&self, path: &Path, enforce_detection: bool) -> Result<(Embedding, bool), MatchError> {
        let image = decode_rgb(path).map_err(|source| MatchError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        let faces = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(&image)?;

        tracing::debug!(
            path = %path.display(),
            faces = faces.len(),
            best = faces.first().map(|f| f.confidence),
            "detection finished"
        );

        let (crop, detected) = face_crop(&image, &faces, enforce_detection)
            .ok_or_else(|| MatchError::NoFaceDetected(path.to_path_buf()))?;

        let embedding = self
            .recognizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extract(&crop)?;

        Ok((embedding, detected))
    }
}

impl FaceMatcher for OnnxFaceMatcher {
    fn verify(&self, img1: &Path, img2: &Path, config: &MatchConfig) -> Result<MatchResult, MatchError> {
        // Only one model and detector are compiled in; anything else is a caller bug.
        if config.model != EmbeddingModel::ArcFace || config.detector != DetectorBackend::Scrfd {
            return Err(MatchError::Unsupported(config.method_label()));
        }

        let (emb1, face1) = self.embed(img1, config.enforce_detection)?;
        let (emb2, face2) = self.embed(img2, config.enforce_detection)?;

        let distance = finite_distance(config.metric, &emb1, &emb2)?;

        Ok(MatchResult {
            distance,
            threshold: recommended_threshold(config.model, config.metric),
            model: config.model,
            detector: config.detector,
            metric: config.metric,
            faces_detected: (face1, face2),
        })
    }

    fn warm_up(&self) -> Result<(), MatchError> {
        let sample = warm_up_sample();
        let faces = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(&sample)?;
        let (crop, _) = face_crop(&sample, &faces, false)
            .ok_or_else(|| MatchError::Unsupported("warm-up sample produced no crop".into()))?;
        self.recognizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extract(&crop)?;
        Ok(())
    }
}

/// Distance between two embeddings; NaN or infinite inputs and results are errors.
fn finite_distance(
    metric: DistanceMetric,
    a: &Embedding,
    b: &Embedding,
) -> Result<f64, MatchError> {
    let distance = metric.distance(a, b);
    if !a.is_finite() || !b.is_finite() || !distance.is_finite() {
        return Err(MatchError::NonFiniteDistance { metric });
    }
    Ok(f64::from(distance.max(0.0)))
}

/// Decode by content; staged files share one suffix whatever their format.
fn decode_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    let image = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::IoError)?
        .decode()?;
    Ok(image.to_rgb8())
}

/// Pick the crop to embed: the highest-confidence face aligned by its
/// landmarks, or the whole image when detection is not enforced.
///
/// Returns the crop and whether it came from a detected face; `None` means
/// no face was found and detection is enforced.
pub fn face_crop(
    image: &RgbImage,
    faces: &[BoundingBox],
    enforce_detection: bool,
) -> Option<(RgbImage, bool)> {
    let best = faces
        .iter()
        .filter(|f| f.landmarks.is_some())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

    match best.and_then(|f| f.landmarks.as_ref()) {
        Some(landmarks) => Some((alignment::align_face(image, landmarks), true)),
        None if enforce_detection => None,
        None => Some((alignment::whole_image_crop(image), false)),
    }
}

/// Fixed sample frame for warm-up: a mid-grey square with a lighter oval.
fn warm_up_sample() -> RgbImage {
    RgbImage::from_fn(200, 200, |x, y| {
        let dx = (x as f32 - 100.0) / 60.0;
        let dy = (y as f32 - 100.0) / 80.0;
        if dx * dx + dy * dy <= 1.0 {
            Rgb([205, 170, 150])
        } else {
            Rgb([110, 110, 110])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(x: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y: 10.0,
            width: 50.0,
            height: 50.0,
            confidence,
            landmarks: Some([
                (x + 15.0, 25.0),
                (x + 35.0, 25.0),
                (x + 25.0, 35.0),
                (x + 17.0, 45.0),
                (x + 33.0, 45.0),
            ]),
        }
    }

    #[test]
    fn test_default_config_disables_enforcement() {
        let config = MatchConfig::default();
        assert!(!config.enforce_detection);
        assert_eq!(config.model, EmbeddingModel::ArcFace);
        assert_eq!(config.detector, DetectorBackend::Scrfd);
        assert_eq!(config.metric, DistanceMetric::Cosine);
    }

    #[test]
    fn test_method_label() {
        assert_eq!(MatchConfig::default().method_label(), "ArcFace + scrfd (cosine)");
    }

    #[test]
    fn test_recommended_thresholds() {
        assert_eq!(recommended_threshold(EmbeddingModel::ArcFace, DistanceMetric::Cosine), 0.68);
        assert_eq!(recommended_threshold(EmbeddingModel::ArcFace, DistanceMetric::Euclidean), 4.15);
        assert_eq!(recommended_threshold(EmbeddingModel::ArcFace, DistanceMetric::EuclideanL2), 1.13);
    }

    #[test]
    fn test_metric_distance_identical_is_zero() {
        let a = Embedding { values: vec![0.6, 0.8], model_version: None };
        for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean, DistanceMetric::EuclideanL2] {
            assert!(metric.distance(&a, &a).abs() < 1e-6, "{metric}");
        }
    }

    #[test]
    fn test_non_finite_embedding_is_rejected() {
        let good = Embedding { values: vec![0.6, 0.8], model_version: None };
        let broken = Embedding { values: vec![f32::NAN, 0.8], model_version: None };
        for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean, DistanceMetric::EuclideanL2] {
            let err = finite_distance(metric, &good, &broken).unwrap_err();
            assert!(matches!(err, MatchError::NonFiniteDistance { metric: m } if m == metric));
        }
    }

    #[test]
    fn test_finite_distance_passes_through() {
        let a = Embedding { values: vec![1.0, 0.0], model_version: None };
        let b = Embedding { values: vec![0.0, 1.0], model_version: None };
        let d = finite_distance(DistanceMetric::Cosine, &a, &b).unwrap();
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_face_crop_picks_detected_face() {
        let image = RgbImage::from_pixel(200, 100, Rgb([90, 90, 90]));
        let faces = [face_at(0.0, 0.6), face_at(100.0, 0.9)];
        let (crop, detected) = face_crop(&image, &faces, true).expect("crop");
        assert!(detected);
        assert_eq!(crop.dimensions(), (alignment::ALIGNED_SIZE, alignment::ALIGNED_SIZE));
    }

    #[test]
    fn test_face_crop_best_effort_without_face() {
        let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 255]));
        let (crop, detected) = face_crop(&image, &[], false).expect("best-effort crop");
        assert!(!detected);
        assert_eq!(crop.get_pixel(10, 10).0, [0, 0, 255]);
    }

    #[test]
    fn test_face_crop_enforced_without_face() {
        let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 255]));
        assert!(face_crop(&image, &[], true).is_none());
    }

    #[test]
    fn test_face_crop_ignores_faces_without_landmarks() {
        let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let mut face = face_at(0.0, 0.99);
        face.landmarks = None;
        assert!(face_crop(&image, &[face], true).is_none());
    }

    #[test]
    fn test_decode_ignores_misleading_suffix() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("staged.jpg");
        RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        let decoded = decode_rgb(&path).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("staged.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(decode_rgb(&path).is_err());
    }

    #[test]
    fn test_warm_up_sample_is_fixed() {
        assert_eq!(warm_up_sample(), warm_up_sample());
        assert_eq!(warm_up_sample().dimensions(), (200, 200));
    }
}
