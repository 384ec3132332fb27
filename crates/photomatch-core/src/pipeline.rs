//! Image comparison pipeline: stage → match → interpret → report.

use std::path::PathBuf;

use thiserror::Error;

use crate::matcher::{FaceMatcher, MatchConfig, MatchError, MatchResult};
use crate::staging::StagedFile;
use crate::types::{round_to, ImageAsset, VerdictReport};

/// Decimal places shown for similarity and distance.
const DISPLAY_PRECISION: i32 = 4;

/// Which upload was absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingInput {
    Reference,
    Candidate,
    Both,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("both images are required (missing: {0:?})")]
    InputMissing(MissingInput),
    #[error("failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),
    #[error("face matching failed: {0}")]
    Matching(#[from] MatchError),
}

/// Per-process settings for [`compare`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Directory staged uploads are written into.
    pub staging_dir: PathBuf,
    pub match_config: MatchConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir(),
            match_config: MatchConfig::default(),
        }
    }
}

/// Compare the face in `reference` against `candidate`.
///
/// Nothing touches the filesystem unless both images are present. Staged
/// files are removed before this returns, whichever way it returns.
pub fn compare(
    reference: Option<ImageAsset>,
    candidate: Option<ImageAsset>,
    matcher: &dyn FaceMatcher,
    options: &PipelineOptions,
) -> Result<VerdictReport, PipelineError> {
    let (reference, candidate) = match (reference, candidate) {
        (Some(r), Some(c)) => (r, c),
        (None, Some(_)) => return Err(PipelineError::InputMissing(MissingInput::Reference)),
        (Some(_), None) => return Err(PipelineError::InputMissing(MissingInput::Candidate)),
        (None, None) => return Err(PipelineError::InputMissing(MissingInput::Both)),
    };

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("compare", %request_id);
    let _guard = span.enter();

    let (staged_ref, staged_cand) = stage_pair(&reference, &candidate, |asset| {
        StagedFile::stage(asset, &options.staging_dir)
    })?;

    let config = options.match_config;
    tracing::debug!(
        model = %config.model,
        detector = %config.detector,
        enforce_detection = config.enforce_detection,
        "invoking matcher"
    );
    let outcome = matcher.verify(staged_ref.path(), staged_cand.path(), &config);

    // Removal failures are logged by discard and do not change the verdict.
    let _ = staged_ref.discard();
    let _ = staged_cand.discard();

    let result = outcome?;
    let report = interpret(reference.filename(), candidate.filename(), &result, &config);

    tracing::info!(
        reference = %report.reference_path,
        gallery = %report.gallery_path,
        present = report.person_present,
        similarity = report.similarity_score,
        distance = result.distance,
        threshold = result.threshold,
        "comparison finished"
    );

    Ok(report)
}

/// Stage both uploads in order. If the second fails, the first is dropped
/// (and its file removed) before the error is returned.
fn stage_pair(
    reference: &ImageAsset,
    candidate: &ImageAsset,
    mut stage: impl FnMut(&ImageAsset) -> std::io::Result<StagedFile>,
) -> Result<(StagedFile, StagedFile), PipelineError> {
    let staged_ref = stage(reference).map_err(PipelineError::Staging)?;
    let staged_cand = stage(candidate).map_err(PipelineError::Staging)?;
    Ok((staged_ref, staged_cand))
}

/// Map a raw match result onto the user-facing report.
///
/// The decision uses the unrounded distance against the matcher's threshold;
/// rounding only affects the displayed numbers.
pub fn interpret(
    reference_name: &str,
    gallery_name: &str,
    result: &MatchResult,
    config: &MatchConfig,
) -> VerdictReport {
    VerdictReport {
        reference_path: reference_name.to_string(),
        gallery_path: gallery_name.to_string(),
        person_present: result.distance < result.threshold,
        similarity_score: round_to(1.0 - result.distance, DISPLAY_PRECISION),
        distance: round_to(result.distance, DISPLAY_PRECISION),
        threshold_used: result.threshold,
        method: config.method_label(),
    }
}
