//! photomatch-core — Face comparison pipeline.
//!
//! Stages two uploaded images, runs them through a [`FaceMatcher`] and turns
//! the raw distance into a [`VerdictReport`]. The shipped matcher uses SCRFD
//! for face detection and ArcFace for recognition, both via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod provisioner;
pub mod recognizer;
pub mod staging;
pub mod types;

pub use matcher::{
    DetectorBackend, DistanceMetric, EmbeddingModel, FaceMatcher, MatchConfig, MatchError,
    MatchResult, OnnxFaceMatcher,
};
pub use pipeline::{compare, MissingInput, PipelineError, PipelineOptions};
pub use provisioner::{ModelProvisioner, OnnxSettings, ProvisioningError, ReadyToken};
pub use types::{ImageAsset, ImageFormat, UploadError, VerdictReport};
