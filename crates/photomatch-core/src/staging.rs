//! On-disk staging of uploaded images.
//!
//! The matcher reads from paths, so each upload is written to a uniquely named
//! temporary file for the length of one comparison. A [`StagedFile`] removes
//! its file when dropped, so every exit path cleans up; [`StagedFile::discard`]
//! does the same while reporting the outcome.

use std::io::{self, Write};
use std::path::Path;

use tempfile::TempPath;

use crate::types::ImageAsset;

pub const STAGED_PREFIX: &str = "photomatch-";
/// Fixed suffix for every staged file; the decoder sniffs the real format.
pub const STAGED_SUFFIX: &str = ".jpg";

/// A temporary file holding one upload's bytes.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
}

impl StagedFile {
    /// Write `asset` into a fresh file inside `dir`.
    ///
    /// On a write failure the half-written file is removed before returning.
    pub fn stage(asset: &ImageAsset, dir: &Path) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(STAGED_PREFIX)
            .suffix(STAGED_SUFFIX)
            .tempfile_in(dir)?;

        file.write_all(asset.bytes())?;
        file.flush()?;

        let path = file.into_temp_path();
        tracing::debug!(
            path = %path.display(),
            bytes = asset.bytes().len(),
            source = asset.filename(),
            media_type = asset.format().media_type(),
            "staged upload"
        );
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now.
    pub fn discard(self) -> io::Result<()> {
        let shown = self.path.display().to_string();
        let result = self.path.close();
        match &result {
            Ok(()) => tracing::debug!(path = %shown, "removed staged file"),
            Err(e) => tracing::warn!(path = %shown, error = %e, "failed to remove staged file"),
        }
        result
    }
}
