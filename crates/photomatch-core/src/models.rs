//! Model artifact resolution.
//!
//! Artifacts are looked up in an explicit model directory, then in the user
//! cache, and finally downloaded into the cache. The cache is never pruned.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SCRFD_MODEL_NAME: &str = "det_10g.onnx";
pub const SCRFD_MODEL_URL: &str =
    "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx";

pub const ARCFACE_MODEL_NAME: &str = "w600k_r50.onnx";
pub const ARCFACE_MODEL_URL: &str =
    "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("model {name} not found and downloads are disabled")]
    Missing { name: String },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// One downloadable model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    /// File name inside the model/cache directory.
    pub name: String,
    pub url: String,
    /// Lowercase hex SHA-256; verified when present.
    pub sha256: Option<String>,
}

impl ModelArtifact {
    pub fn scrfd() -> Self {
        Self {
            name: SCRFD_MODEL_NAME.to_string(),
            url: SCRFD_MODEL_URL.to_string(),
            sha256: None,
        }
    }

    pub fn arcface() -> Self {
        Self {
            name: ARCFACE_MODEL_NAME.to_string(),
            url: ARCFACE_MODEL_URL.to_string(),
            sha256: None,
        }
    }
}

/// Where model files live and whether missing ones may be fetched.
#[derive(Debug, Clone)]
pub struct ModelStore {
    /// Checked first; never written to.
    pub model_dir: Option<PathBuf>,
    /// Download target.
    pub cache_dir: PathBuf,
    pub allow_download: bool,
}

impl ModelStore {
    /// Resolve an artifact to a local path, downloading it if allowed.
    pub fn resolve(&self, artifact: &ModelArtifact) -> Result<PathBuf, ModelResolveError> {
        if let Some(dir) = &self.model_dir {
            let path = dir.join(&artifact.name);
            if path.exists() {
                tracing::debug!(path = %path.display(), "model found in model dir");
                verify_checksum(&path, artifact.sha256.as_deref())?;
                return Ok(path);
            }
        }

        let cached = self.cache_dir.join(&artifact.name);
        if cached.exists() {
            tracing::debug!(path = %cached.display(), "model found in cache");
            verify_checksum(&cached, artifact.sha256.as_deref())?;
            return Ok(cached);
        }

        if !self.allow_download {
            return Err(ModelResolveError::Missing {
                name: artifact.name.clone(),
            });
        }

        fs::create_dir_all(&self.cache_dir).map_err(|source| ModelResolveError::CacheDir {
            path: self.cache_dir.clone(),
            source,
        })?;

        tracing::info!(url = %artifact.url, dest = %cached.display(), "downloading model");
        download(&artifact.url, &cached, artifact.sha256.as_deref())?;
        Ok(cached)
    }
}

/// Platform cache directory for model files, e.g. `~/.cache/photomatch/models`.
pub fn default_cache_dir() -> Result<PathBuf, ModelResolveError> {
    dirs::cache_dir()
        .map(|d| d.join("photomatch").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path, sha256: Option<&str>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_inner(url, dest, &temp_path, sha256);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    sha256: Option<&str>,
) -> Result<(), ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelResolveError::Download {
            url: url.to_string(),
            source,
        })?;

    let write_err = |source: std::io::Error| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source,
    };

    let mut file = fs::File::create(temp_path).map_err(write_err)?;
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;

    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        hasher.update(&buf[..n]);
        downloaded += n as u64;
    }
    file.flush().map_err(write_err)?;
    drop(file);

    if let Some(expected) = sha256 {
        check_digest(temp_path, expected, &hex(&hasher.finalize()))?;
    }

    fs::rename(temp_path, dest).map_err(|source| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source,
    })?;

    tracing::info!(path = %dest.display(), bytes = downloaded, "model downloaded");
    Ok(())
}

fn verify_checksum(path: &Path, expected: Option<&str>) -> Result<(), ModelResolveError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let bytes = fs::read(path).map_err(|source| ModelResolveError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    check_digest(path, expected, &hex(&Sha256::digest(&bytes)))
}

fn check_digest(path: &Path, expected: &str, actual: &str) -> Result<(), ModelResolveError> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(ModelResolveError::Checksum {
            path: path.to_path_buf(),
            expected: expected.to_ascii_lowercase(),
            actual: actual.to_string(),
        })
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MODEL_BYTES: &[u8] = b"model bytes";

    fn digest_of(bytes: &[u8]) -> String {
        hex(&Sha256::digest(bytes))
    }

    fn artifact(name: &str, sha256: Option<String>) -> ModelArtifact {
        ModelArtifact {
            name: name.to_string(),
            url: "http://127.0.0.1:9/unreachable".to_string(),
            sha256,
        }
    }

    #[test]
    fn test_hex_encoding() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }

    #[test]
    fn test_model_dir_takes_precedence() {
        let models = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        fs::write(models.path().join("det.onnx"), MODEL_BYTES).unwrap();
        fs::write(cache.path().join("det.onnx"), MODEL_BYTES).unwrap();

        let store = ModelStore {
            model_dir: Some(models.path().to_path_buf()),
            cache_dir: cache.path().to_path_buf(),
            allow_download: false,
        };
        let path = store.resolve(&artifact("det.onnx", None)).unwrap();
        assert_eq!(path, models.path().join("det.onnx"));
    }

    #[test]
    fn test_cache_hit() {
        let cache = TempDir::new().unwrap();
        fs::write(cache.path().join("rec.onnx"), MODEL_BYTES).unwrap();

        let store = ModelStore {
            model_dir: None,
            cache_dir: cache.path().to_path_buf(),
            allow_download: false,
        };
        let path = store
            .resolve(&artifact("rec.onnx", Some(digest_of(MODEL_BYTES))))
            .unwrap();
        assert_eq!(path, cache.path().join("rec.onnx"));
    }

    #[test]
    fn test_missing_without_download() {
        let cache = TempDir::new().unwrap();
        let store = ModelStore {
            model_dir: None,
            cache_dir: cache.path().to_path_buf(),
            allow_download: false,
        };
        let err = store.resolve(&artifact("absent.onnx", None)).unwrap_err();
        assert!(matches!(err, ModelResolveError::Missing { ref name } if name == "absent.onnx"));
    }

    #[test]
    fn test_corrupted_artifact_rejected() {
        let cache = TempDir::new().unwrap();
        fs::write(cache.path().join("rec.onnx"), b"truncated").unwrap();

        let store = ModelStore {
            model_dir: None,
            cache_dir: cache.path().to_path_buf(),
            allow_download: false,
        };
        let err = store
            .resolve(&artifact("rec.onnx", Some(digest_of(MODEL_BYTES))))
            .unwrap_err();
        assert!(matches!(err, ModelResolveError::Checksum { .. }));
    }

    #[test]
    fn test_failed_download_leaves_no_part_file() {
        let cache = TempDir::new().unwrap();
        let store = ModelStore {
            model_dir: None,
            cache_dir: cache.path().join("models"),
            allow_download: true,
        };
        let err = store.resolve(&artifact("det.onnx", None)).unwrap_err();
        assert!(matches!(err, ModelResolveError::Download { .. }));
        assert!(!cache.path().join("models").join("det.part").exists());
        assert!(!cache.path().join("models").join("det.onnx").exists());
    }
}
