use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upload extensions accepted by the comparison form.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("unsupported image type for {filename}: only jpg, jpeg and png are accepted")]
    UnsupportedType { filename: String },
    #[error("uploaded file {filename} is empty")]
    Empty { filename: String },
}

/// Declared media type of an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Resolve a format from a file extension (case-insensitive, no leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    /// Resolve a format from a MIME type such as `image/png`.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// An uploaded image held in memory for the duration of one comparison.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    bytes: Vec<u8>,
    filename: String,
    format: ImageFormat,
}

impl ImageAsset {
    /// Build an asset from an upload.
    ///
    /// The filename extension decides the format; the declared media type is
    /// only consulted when the filename has no extension.
    pub fn new(
        filename: impl Into<String>,
        media_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Self, UploadError> {
        let filename = filename.into();

        let ext = std::path::Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str());
        let format = match ext {
            Some(ext) => ImageFormat::from_extension(ext),
            None => media_type.and_then(ImageFormat::from_media_type),
        }
        .ok_or_else(|| UploadError::UnsupportedType {
            filename: filename.clone(),
        })?;

        if bytes.is_empty() {
            return Err(UploadError::Empty { filename });
        }

        Ok(Self {
            bytes,
            filename,
            format,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Original filename as uploaded.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
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

    /// Cosine distance: `1 - similarity`, clamped to be non-negative.
    /// NaN passes through the clamp.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        let distance = 1.0 - self.similarity(other);
        if distance < 0.0 { 0.0 } else { distance }
    }

    /// Whether every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between the raw vectors.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Euclidean distance after L2-normalizing both vectors.
    pub fn euclidean_l2_distance(&self, other: &Embedding) -> f32 {
        self.l2_normalized().euclidean_distance(&other.l2_normalized())
    }

    fn l2_normalized(&self) -> Embedding {
        let norm = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model_version: self.model_version.clone(),
        }
    }
}

/// Structured result of one comparison, serialized with the exact field
/// names shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictReport {
    /// Original filename of the reference upload.
    pub reference_path: String,
    /// Original filename of the candidate upload.
    pub gallery_path: String,
    pub person_present: bool,
    /// `1 - distance`, rounded to 4 decimal places.
    pub similarity_score: f64,
    /// Rounded to 4 decimal places.
    pub distance: f64,
    /// Decision boundary reported by the matcher, unrounded.
    pub threshold_used: f64,
    pub method: String,
}

/// Round to `places` decimal places, ties to even.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    let scaled = value * factor;
    let mut rounded = scaled.round();
    if (scaled - scaled.trunc()).abs() == 0.5 {
        rounded = 2.0 * (scaled / 2.0).round();
    }
    rounded / factor
}
