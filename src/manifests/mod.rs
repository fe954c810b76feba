//! Deterministic rendering of the generated artifact trees.
//!
//! Two artifact sets exist per bootstrap run: the installation set (the
//! component manifests committed and applied first) and the sync-pointer set
//! (the descriptors telling the environment where to pull desired state from
//! going forward). Rendering is deterministic for identical parameters — no
//! timestamps, no random identifiers — so an unchanged re-run produces
//! byte-identical artifacts and the commit step's "no changes" path fires.

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod install;
pub mod secret;
pub mod sync;

pub use install::InstallOptions;
pub use sync::SyncOptions;

/// Name of the composite entry-point file listing the other artifacts.
pub const ENTRY_POINT_FILE: &str = "kustomization.yaml";

/// One rendered artifact: a repository-relative path and its content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactFile {
    /// Path relative to the repository root.
    pub path: Utf8PathBuf,
    /// Rendered plain-text content.
    pub content: String,
}

/// Errors raised while materialising artifacts on disk.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Raised when an artifact file or directory cannot be written.
    #[error("failed to write artifact {path}: {message}")]
    Write {
        /// Path that failed to write.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// An ordered collection of rendered artifacts plus a content digest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactSet {
    files: Vec<ArtifactFile>,
}

impl ArtifactSet {
    pub(crate) const fn new(files: Vec<ArtifactFile>) -> Self {
        Self { files }
    }

    /// Returns the rendered files in order.
    #[must_use]
    pub fn files(&self) -> &[ArtifactFile] {
        &self.files
    }

    /// Computes a hex-encoded SHA-256 digest over paths and contents.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.path.as_str().as_bytes());
            hasher.update([0]);
            hasher.update(file.content.as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }

    /// Writes every artifact beneath `root`, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Write`] when a directory or file cannot be
    /// created.
    pub fn write_to(&self, root: &Utf8Path) -> Result<(), ManifestError> {
        for file in &self.files {
            let target = root.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|err| ManifestError::Write {
                    path: parent.to_owned(),
                    message: err.to_string(),
                })?;
            }
            std::fs::write(&target, &file.content).map_err(|err| ManifestError::Write {
                path: target.clone(),
                message: err.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Joins the repository-relative directory that holds both artifact sets.
#[must_use]
pub fn artifact_root(target_path: &str, namespace: &str) -> Utf8PathBuf {
    let trimmed = target_path.trim_matches('/');
    if trimmed.is_empty() {
        Utf8PathBuf::from(namespace)
    } else {
        Utf8PathBuf::from(trimmed).join(namespace)
    }
}
