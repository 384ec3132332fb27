//! One-time initialization of the face-matching capability.
//!
//! [`ModelProvisioner::ensure_ready`] runs the expensive setup (artifact
//! resolution, session loading, warm-up) on its first call and hands every
//! later caller the same [`ReadyToken`]. A failed setup is remembered and
//! returned again; it is never retried within the process.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::matcher::{FaceMatcher, OnnxFaceMatcher};
use crate::models::{ModelArtifact, ModelStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("model artifact unavailable: {0}")]
    Artifact(String),
    #[error("failed to load models: {0}")]
    Load(String),
    #[error("warm-up inference failed: {0}")]
    WarmUp(String),
}

/// Proof that the matcher finished initializing.
#[derive(Clone)]
pub struct ReadyToken {
    matcher: Arc<dyn FaceMatcher>,
    ready_at: DateTime<Utc>,
}

impl ReadyToken {
    pub fn matcher(&self) -> &dyn FaceMatcher {
        self.matcher.as_ref()
    }

    pub fn shared_matcher(&self) -> Arc<dyn FaceMatcher> {
        Arc::clone(&self.matcher)
    }

    pub fn ready_at(&self) -> DateTime<Utc> {
        self.ready_at
    }

    /// Whether both tokens come from the same initialization.
    pub fn same_as(&self, other: &ReadyToken) -> bool {
        Arc::ptr_eq(&self.matcher, &other.matcher)
    }
}

impl fmt::Debug for ReadyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyToken")
            .field("ready_at", &self.ready_at)
            .finish_non_exhaustive()
    }
}

type InitFn = Box<dyn Fn() -> Result<Arc<dyn FaceMatcher>, ProvisioningError> + Send + Sync>;

/// Process-wide owner of the matcher's lazy initialization.
pub struct ModelProvisioner {
    init: InitFn,
    /// Serializes initialization and remembers a failure.
    failure: Mutex<Option<ProvisioningError>>,
    ready: OnceLock<ReadyToken>,
}

impl ModelProvisioner {
    pub fn new<M, F>(init: F) -> Self
    where
        M: FaceMatcher + 'static,
        F: Fn() -> Result<M, ProvisioningError> + Send + Sync + 'static,
    {
        Self {
            init: Box::new(move || init().map(|m| Arc::new(m) as Arc<dyn FaceMatcher>)),
            failure: Mutex::new(None),
            ready: OnceLock::new(),
        }
    }

    /// Provisioner for the ONNX matcher: resolve both artifacts, load the
    /// sessions, then run one warm-up pass.
    pub fn onnx(settings: OnnxSettings) -> Self {
        Self::new(move || provision_onnx(&settings))
    }

    /// Initialize on first call; return the same token afterwards.
    pub fn ensure_ready(&self) -> Result<ReadyToken, ProvisioningError> {
        if let Some(token) = self.ready.get() {
            return Ok(token.clone());
        }

        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished while we waited for the lock.
        if let Some(token) = self.ready.get() {
            return Ok(token.clone());
        }
        if let Some(err) = failure.as_ref() {
            return Err(err.clone());
        }

        tracing::info!("initializing face matcher");
        let started = Instant::now();

        match (self.init)() {
            Ok(matcher) => {
                let token = self.ready.get_or_init(|| ReadyToken {
                    matcher,
                    ready_at: Utc::now(),
                });
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "face matcher ready"
                );
                Ok(token.clone())
            }
            Err(err) => {
                tracing::error!(error = %err, "face matcher initialization failed");
                *failure = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }
}

/// Inputs for [`ModelProvisioner::onnx`].
#[derive(Debug, Clone)]
pub struct OnnxSettings {
    pub store: ModelStore,
    pub detector: ModelArtifact,
    pub recognizer: ModelArtifact,
    pub intra_threads: usize,
}

fn provision_onnx(settings: &OnnxSettings) -> Result<OnnxFaceMatcher, ProvisioningError> {
    let resolve = |artifact: &ModelArtifact| -> Result<PathBuf, ProvisioningError> {
        settings
            .store
            .resolve(artifact)
            .map_err(|e| ProvisioningError::Artifact(e.to_string()))
    };

    let detector_path = resolve(&settings.detector)?;
    let recognizer_path = resolve(&settings.recognizer)?;

    let matcher = OnnxFaceMatcher::load(&detector_path, &recognizer_path, settings.intra_threads)
        .map_err(|e| ProvisioningError::Load(e.to_string()))?;

    matcher
        .warm_up()
        .map_err(|e| ProvisioningError::WarmUp(e.to_string()))?;

    Ok(matcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{DetectorBackend, DistanceMetric, EmbeddingModel, MatchConfig, MatchError, MatchResult};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedMatcher;

    impl FaceMatcher for FixedMatcher {
        fn verify(&self, _: &Path, _: &Path, config: &MatchConfig) -> Result<MatchResult, MatchError> {
            Ok(MatchResult {
                distance: 0.0,
                threshold: 0.68,
                model: EmbeddingModel::ArcFace,
                detector: DetectorBackend::Scrfd,
                metric: config.metric,
                faces_detected: (true, true),
            })
        }
    }

    fn counting(delay: Duration) -> (Arc<AtomicUsize>, ModelProvisioner) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provisioner = ModelProvisioner::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(delay);
            Ok(FixedMatcher)
        });
        (calls, provisioner)
    }

    #[test]
    fn test_initializes_once() {
        let (calls, provisioner) = counting(Duration::from_millis(50));
        assert!(!provisioner.is_ready());

        let first_started = Instant::now();
        let first = provisioner.ensure_ready().unwrap();
        let first_elapsed = first_started.elapsed();

        let second_started = Instant::now();
        let second = provisioner.ensure_ready().unwrap();
        let second_elapsed = second_started.elapsed();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.same_as(&second));
        assert_eq!(first.ready_at(), second.ready_at());
        assert!(second_elapsed < first_elapsed);
        assert!(provisioner.is_ready());
    }

    #[test]
    fn test_concurrent_callers_share_one_initialization() {
        let (calls, provisioner) = counting(Duration::from_millis(20));
        let provisioner = Arc::new(provisioner);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = Arc::clone(&provisioner);
                std::thread::spawn(move || p.ensure_ready().unwrap())
            })
            .collect();
        let tokens: Vec<ReadyToken> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tokens.windows(2).all(|w| w[0].same_as(&w[1])));
    }

    #[test]
    fn test_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provisioner = ModelProvisioner::new(move || -> Result<FixedMatcher, ProvisioningError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProvisioningError::Artifact("offline".into()))
        });

        let first = provisioner.ensure_ready().unwrap_err();
        let second = provisioner.ensure_ready().unwrap_err();

        assert_eq!(first, ProvisioningError::Artifact("offline".into()));
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!provisioner.is_ready());
    }

    #[test]
    fn test_token_exposes_matcher() {
        let (_, provisioner) = counting(Duration::ZERO);
        let token = provisioner.ensure_ready().unwrap();
        let result = token
            .matcher()
            .verify(Path::new("a"), Path::new("b"), &MatchConfig::default())
            .unwrap();
        assert_eq!(result.metric, DistanceMetric::Cosine);
    }

    #[test]
    fn test_onnx_without_models_fails_fast() {
        let dir = tempfile::TempDir::new().unwrap();
        let provisioner = ModelProvisioner::onnx(OnnxSettings {
            store: ModelStore {
                model_dir: None,
                cache_dir: dir.path().to_path_buf(),
                allow_download: false,
            },
            detector: ModelArtifact::scrfd(),
            recognizer: ModelArtifact::arcface(),
            intra_threads: 1,
        });

        let err = provisioner.ensure_ready().unwrap_err();
        assert!(matches!(err, ProvisioningError::Artifact(_)));
    }
}
