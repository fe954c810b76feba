//! Idempotent application of a generated artifact tree.
//!
//! `apply` is a single "create-or-replace the full set described by this
//! directory" operation. Partial application is acceptable; a subsequent
//! run of the same call corrects it. Updates use an explicit
//! read-modify-write loop bounded by attempt count so optimistic-concurrency
//! races with other writers are retried, never silently absorbed.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use super::{EnvObject, EnvironmentClient, EnvironmentError};
use crate::manifests::ENTRY_POINT_FILE;

const UPDATE_ATTEMPTS: u32 = 3;

/// Errors raised while applying an artifact directory.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Raised when an artifact file cannot be read.
    #[error("failed to read artifact {path}: {message}")]
    Io {
        /// File that failed to read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when an artifact file is not valid YAML.
    #[error("failed to parse artifact {path}: {message}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Parser error string.
        message: String,
    },
    /// Raised when the directory has no entry-point file.
    #[error("artifact directory {path} has no {ENTRY_POINT_FILE}")]
    MissingEntryPoint {
        /// Directory that was expected to contain the entry point.
        path: Utf8PathBuf,
    },
    /// Raised when a manifest is structurally invalid or a write fails.
    #[error("failed to apply {reference}: {source}")]
    Environment {
        /// Object that failed to apply.
        reference: String,
        /// Underlying client error.
        #[source]
        source: EnvironmentError,
    },
    /// Raised when optimistic-concurrency retries are exhausted.
    #[error("conflicting writers on {reference}; gave up after {UPDATE_ATTEMPTS} attempts")]
    ConflictExhausted {
        /// Object that kept conflicting.
        reference: String,
    },
}

/// Outcome counters for one apply pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ApplySummary {
    /// Objects that did not exist and were created.
    pub created: usize,
    /// Objects that existed with different content and were replaced.
    pub updated: usize,
    /// Objects that already matched the desired state.
    pub unchanged: usize,
}

impl ApplySummary {
    /// Returns `true` when the pass performed no writes at all.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0
    }
}

#[derive(Debug, Deserialize)]
struct EntryPoint {
    resources: Vec<String>,
}

enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Applies generated artifact trees through an [`EnvironmentClient`].
#[derive(Debug)]
pub struct Applier<'a, E: EnvironmentClient> {
    client: &'a E,
}

impl<'a, E: EnvironmentClient> Applier<'a, E> {
    /// Creates an applier borrowing the given client.
    #[must_use]
    pub const fn new(client: &'a E) -> Self {
        Self { client }
    }

    /// Applies every object listed by the directory's entry-point file.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when artifacts cannot be read or parsed, when
    /// a write fails, or when conflict retries are exhausted. Objects
    /// applied before the failure remain applied.
    pub async fn apply(&self, dir: &Utf8Path) -> Result<ApplySummary, ApplyError> {
        let objects = load_artifact_tree(dir)?;
        let mut summary = ApplySummary::default();
        for object in &objects {
            match self.upsert(object).await? {
                UpsertOutcome::Created => summary.created += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => summary.unchanged += 1,
            }
        }
        Ok(summary)
    }

    /// Creates or replaces a single object, retrying on conflicting writes.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Environment`] on non-conflict write failures
    /// and [`ApplyError::ConflictExhausted`] when retries run out.
    pub async fn apply_object(&self, object: &EnvObject) -> Result<bool, ApplyError> {
        match self.upsert(object).await? {
            UpsertOutcome::Unchanged => Ok(false),
            UpsertOutcome::Created | UpsertOutcome::Updated => Ok(true),
        }
    }

    async fn upsert(&self, desired: &EnvObject) -> Result<UpsertOutcome, ApplyError> {
        for _attempt in 0..UPDATE_ATTEMPTS {
            let existing = match self.client.get(&desired.reference).await {
                Ok(existing) => Some(existing),
                Err(EnvironmentError::NotFound { .. }) => None,
                Err(source) => return Err(environment_error(desired, source)),
            };

            let write = match existing {
                Some(current) if current.manifest == desired.manifest => {
                    return Ok(UpsertOutcome::Unchanged);
                }
                Some(_) => self.client.update(desired).await.map(|()| UpsertOutcome::Updated),
                None => self.client.create(desired).await.map(|()| UpsertOutcome::Created),
            };

            match write {
                Ok(outcome) => return Ok(outcome),
                // Another writer raced us; re-read and try again.
                Err(EnvironmentError::Conflict { .. }) => {}
                Err(source) => return Err(environment_error(desired, source)),
            }
        }

        Err(ApplyError::ConflictExhausted {
            reference: desired.reference.to_string(),
        })
    }
}

fn environment_error(object: &EnvObject, source: EnvironmentError) -> ApplyError {
    ApplyError::Environment {
        reference: object.reference.to_string(),
        source,
    }
}

fn load_artifact_tree(dir: &Utf8Path) -> Result<Vec<EnvObject>, ApplyError> {
    let entry_path = dir.join(ENTRY_POINT_FILE);
    let entry_text = read_artifact(&entry_path).map_err(|err| match err {
        ApplyError::Io { .. } => ApplyError::MissingEntryPoint {
            path: dir.to_owned(),
        },
        other => other,
    })?;
    let entry: EntryPoint =
        serde_yaml::from_str(&entry_text).map_err(|err| ApplyError::Parse {
            path: entry_path,
            message: err.to_string(),
        })?;

    let mut objects = Vec::new();
    for resource in &entry.resources {
        let path = dir.join(resource);
        let text = read_artifact(&path)?;
        objects.extend(parse_documents(&path, &text)?);
    }
    Ok(objects)
}

fn read_artifact(path: &Utf8Path) -> Result<String, ApplyError> {
    std::fs::read_to_string(path).map_err(|err| ApplyError::Io {
        path: path.to_owned(),
        message: err.to_string(),
    })
}

fn parse_documents(path: &Utf8Path, text: &str) -> Result<Vec<EnvObject>, ApplyError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value: serde_json::Value =
            serde::Deserialize::deserialize(document).map_err(|err| ApplyError::Parse {
                path: path.to_owned(),
                message: err.to_string(),
            })?;
        if value.is_null() {
            continue;
        }
        let object = EnvObject::from_manifest(value).map_err(|source| ApplyError::Parse {
            path: path.to_owned(),
            message: source.to_string(),
        })?;
        objects.push(object);
    }
    Ok(objects)
}
