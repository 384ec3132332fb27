use std::path::{Path, PathBuf};

use photomatch_core::models::{self, ModelArtifact, ModelStore};
use photomatch_core::OnnxSettings;
use serde::Deserialize;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8501";
const DEFAULT_INTRA_THREADS: usize = 2;

/// Daemon configuration.
///
/// Layers, lowest priority first: built-in defaults, the TOML config file,
/// `PHOTOMATCH_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the web form listens on.
    pub bind_addr: String,
    /// Directory searched for ONNX model files before the cache.
    pub model_dir: Option<PathBuf>,
    /// Where downloaded models are kept (platform cache dir by default).
    pub cache_dir: Option<PathBuf>,
    /// Directory for staged uploads (system temp dir by default).
    pub staging_dir: PathBuf,
    /// Fetch missing models over the network.
    pub allow_download: bool,
    pub detector_url: String,
    pub detector_sha256: Option<String>,
    pub recognizer_url: String,
    pub recognizer_sha256: Option<String>,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

/// Shape of the TOML config file; every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub allow_download: Option<bool>,
    pub detector_url: Option<String>,
    pub detector_sha256: Option<String>,
    pub recognizer_url: Option<String>,
    pub recognizer_sha256: Option<String>,
    pub intra_threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            model_dir: None,
            cache_dir: None,
            staging_dir: std::env::temp_dir(),
            allow_download: true,
            detector_url: models::SCRFD_MODEL_URL.to_string(),
            detector_sha256: None,
            recognizer_url: models::ARCFACE_MODEL_URL.to_string(),
            recognizer_sha256: None,
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Self {
        let file = config_file_path().and_then(|path| load_file(&path));
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build a config from an optional parsed file and an environment lookup.
    pub fn from_sources(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(file) = file {
            config.apply_file(file);
        }
        config.apply_env(env);
        config
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if file.model_dir.is_some() {
            self.model_dir = file.model_dir;
        }
        if file.cache_dir.is_some() {
            self.cache_dir = file.cache_dir;
        }
        if let Some(v) = file.staging_dir {
            self.staging_dir = v;
        }
        if let Some(v) = file.allow_download {
            self.allow_download = v;
        }
        if let Some(v) = file.detector_url {
            self.detector_url = v;
        }
        if file.detector_sha256.is_some() {
            self.detector_sha256 = file.detector_sha256;
        }
        if let Some(v) = file.recognizer_url {
            self.recognizer_url = v;
        }
        if file.recognizer_sha256.is_some() {
            self.recognizer_sha256 = file.recognizer_sha256;
        }
        match file.intra_threads {
            Some(0) => tracing::warn!("intra_threads must be at least 1, ignoring config value"),
            Some(v) => self.intra_threads = v,
            None => {}
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("PHOTOMATCH_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = env("PHOTOMATCH_MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("PHOTOMATCH_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("PHOTOMATCH_STAGING_DIR") {
            self.staging_dir = PathBuf::from(v);
        }
        if let Some(v) = env("PHOTOMATCH_ALLOW_DOWNLOAD") {
            match parse_flag(&v) {
                Some(flag) => self.allow_download = flag,
                None => tracing::warn!(value = %v, "PHOTOMATCH_ALLOW_DOWNLOAD is not a boolean, ignoring"),
            }
        }
        if let Some(v) = env("PHOTOMATCH_DETECTOR_URL") {
            self.detector_url = v;
        }
        if let Some(v) = env("PHOTOMATCH_DETECTOR_SHA256") {
            self.detector_sha256 = Some(v);
        }
        if let Some(v) = env("PHOTOMATCH_RECOGNIZER_URL") {
            self.recognizer_url = v;
        }
        if let Some(v) = env("PHOTOMATCH_RECOGNIZER_SHA256") {
            self.recognizer_sha256 = Some(v);
        }
        if let Some(v) = env("PHOTOMATCH_INTRA_THREADS") {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.intra_threads = n,
                _ => tracing::warn!(value = %v, "PHOTOMATCH_INTRA_THREADS must be a positive integer, ignoring"),
            }
        }
    }

    /// Settings for the ONNX provisioner derived from this config.
    pub fn onnx_settings(&self) -> Result<OnnxSettings, models::ModelResolveError> {
        let cache_dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => models::default_cache_dir()?,
        };

        Ok(OnnxSettings {
            store: ModelStore {
                model_dir: self.model_dir.clone(),
                cache_dir,
                allow_download: self.allow_download,
            },
            detector: ModelArtifact {
                name: models::SCRFD_MODEL_NAME.to_string(),
                url: self.detector_url.clone(),
                sha256: self.detector_sha256.clone(),
            },
            recognizer: ModelArtifact {
                name: models::ARCFACE_MODEL_NAME.to_string(),
                url: self.recognizer_url.clone(),
                sha256: self.recognizer_sha256.clone(),
            },
            intra_threads: self.intra_threads,
        })
    }
}

/// Accepts the usual spellings of a boolean flag, case-insensitively.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `PHOTOMATCH_CONFIG`, else `$XDG_CONFIG_HOME/photomatch/config.toml`.
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PHOTOMATCH_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("photomatch").join("config.toml"))
}

/// Read and parse a config file. Missing files are skipped quietly; unreadable
/// or invalid ones are reported and ignored.
fn load_file(path: &Path) -> Option<FileConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found");
        return None;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
            return None;
        }
    };

    match toml::from_str::<FileConfig>(&content) {
        Ok(file) => {
            tracing::info!(path = %path.display(), "loaded config file");
            Some(file)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid config file, ignoring");
            None
        }
    }
}
