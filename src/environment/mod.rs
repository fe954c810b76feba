//! Target-environment object model and client abstraction.
//!
//! The bootstrap engine only ever talks to the runtime environment through
//! the [`EnvironmentClient`] trait: four object operations plus a readiness
//! condition read. Concrete transports (the REST client in [`rest`], the
//! in-memory fake in [`crate::test_support`]) implement the same seam so the
//! orchestrator and appliers stay transport-agnostic.

use std::fmt::{self, Display};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod apply;
pub mod poll;
pub mod rest;

pub use apply::{Applier, ApplyError, ApplySummary};
pub use poll::{PollError, ReadinessTarget, poll_ready};
pub use rest::RestEnvironmentClient;

/// Reference to a single object in the target environment.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object kind (for example `Deployment` or `Secret`).
    pub kind: String,
    /// Object name, unique within its namespace and kind.
    pub name: String,
    /// Namespace scope; `None` for cluster-scoped objects.
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// Builds a namespaced reference.
    #[must_use]
    pub fn namespaced(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Builds a cluster-scoped reference.
    #[must_use]
    pub fn cluster_scoped(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }
}

impl Display for ObjectRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(formatter, "{}/{namespace}/{}", self.kind, self.name),
            None => write!(formatter, "{}/{}", self.kind, self.name),
        }
    }
}

/// A declarative object as stored in (or desired for) the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvObject {
    /// Identity of the object.
    pub reference: ObjectRef,
    /// Full manifest content, including the identity fields.
    pub manifest: serde_json::Value,
}

impl EnvObject {
    /// Extracts the identity fields from a parsed manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Decode`] when `kind` or `metadata.name`
    /// are absent or not strings.
    pub fn from_manifest(manifest: serde_json::Value) -> Result<Self, EnvironmentError> {
        let kind = manifest
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EnvironmentError::Decode {
                message: String::from("manifest is missing a string `kind` field"),
            })?
            .to_owned();
        let metadata = manifest
            .get("metadata")
            .ok_or_else(|| EnvironmentError::Decode {
                message: String::from("manifest is missing `metadata`"),
            })?;
        let name = metadata
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EnvironmentError::Decode {
                message: String::from("manifest is missing `metadata.name`"),
            })?
            .to_owned();
        let namespace = metadata
            .get("namespace")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned);

        Ok(Self {
            reference: ObjectRef {
                kind,
                name,
                namespace,
            },
            manifest,
        })
    }
}

/// Observed state of a named readiness condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConditionStatus {
    /// Not yet observed, or reconciliation still in progress.
    Unknown,
    /// The condition holds; the object is ready.
    True,
    /// The condition failed; the object reports an error.
    False,
}

/// A readiness condition read from an object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Condition {
    /// Whether the condition holds, failed, or is still unknown.
    pub status: ConditionStatus,
    /// Human-readable reason attached by the environment's controllers.
    pub message: String,
}

impl Condition {
    /// Convenience constructor for a satisfied condition.
    #[must_use]
    pub const fn ready() -> Self {
        Self {
            status: ConditionStatus::True,
            message: String::new(),
        }
    }

    /// Convenience constructor for a pending condition.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: ConditionStatus::Unknown,
            message: String::new(),
        }
    }

    /// Convenience constructor for a failed condition with a reason.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::False,
            message: message.into(),
        }
    }
}

/// Errors raised by environment clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EnvironmentError {
    /// Raised when the requested object does not exist.
    #[error("object not found: {reference}")]
    NotFound {
        /// Reference that failed to resolve.
        reference: ObjectRef,
    },
    /// Raised when a write lost an optimistic-concurrency race.
    #[error("conflicting write on {reference}: {message}")]
    Conflict {
        /// Reference that was being written.
        reference: ObjectRef,
        /// Server-provided conflict detail.
        message: String,
    },
    /// Raised when the environment API cannot be reached or errors out.
    #[error("environment transport error: {message}")]
    Transport {
        /// Underlying transport error string.
        message: String,
    },
    /// Raised when a response cannot be decoded into an object.
    #[error("failed to decode environment object: {message}")]
    Decode {
        /// Description of the malformed payload.
        message: String,
    },
}

/// Future returned by environment client operations.
pub type ClientFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EnvironmentError>> + Send + 'a>>;

/// Minimal interface the bootstrap engine requires from the environment.
pub trait EnvironmentClient: Send + Sync {
    /// Fetches a single object.
    fn get<'a>(&'a self, reference: &'a ObjectRef) -> ClientFuture<'a, EnvObject>;

    /// Creates an object that does not exist yet.
    fn create<'a>(&'a self, object: &'a EnvObject) -> ClientFuture<'a, ()>;

    /// Replaces an existing object with the desired manifest.
    fn update<'a>(&'a self, object: &'a EnvObject) -> ClientFuture<'a, ()>;

    /// Lists objects of a kind, optionally scoped to one namespace.
    fn list<'a>(
        &'a self,
        kind: &'a str,
        namespace: Option<&'a str>,
    ) -> ClientFuture<'a, Vec<EnvObject>>;

    /// Reads a named readiness condition from an object.
    fn read_condition<'a>(
        &'a self,
        reference: &'a ObjectRef,
        condition: &'a str,
    ) -> ClientFuture<'a, Condition>;
}

/// Extracts a named condition from a stored manifest's `status.conditions`.
///
/// Missing status blocks or unknown condition names map to
/// [`ConditionStatus::Unknown`] so pollers keep waiting instead of failing.
#[must_use]
pub fn condition_from_manifest(manifest: &serde_json::Value, condition: &str) -> Condition {
    let Some(conditions) = manifest
        .get("status")
        .and_then(|status| status.get("conditions"))
        .and_then(serde_json::Value::as_array)
    else {
        return Condition::unknown();
    };

    for entry in conditions {
        let matches_name = entry
            .get("type")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|name| name == condition);
        if !matches_name {
            continue;
        }
        let message = entry
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let status = match entry.get("status").and_then(serde_json::Value::as_str) {
            Some("True") => ConditionStatus::True,
            Some("False") => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        };
        return Condition { status, message };
    }

    Condition::unknown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_manifest_extracts_identity() {
        let object = EnvObject::from_manifest(json!({
            "kind": "Deployment",
            "metadata": {"name": "source-agent", "namespace": "moor-system"},
        }))
        .expect("manifest should parse");

        assert_eq!(
            object.reference,
            ObjectRef::namespaced("Deployment", "moor-system", "source-agent")
        );
    }

    #[test]
    fn from_manifest_rejects_missing_kind() {
        let error = EnvObject::from_manifest(json!({"metadata": {"name": "x"}}))
            .expect_err("missing kind should fail");
        assert!(matches!(error, EnvironmentError::Decode { .. }));
    }

    #[test]
    fn condition_from_manifest_reads_status() {
        let manifest = json!({
            "status": {"conditions": [
                {"type": "Ready", "status": "False", "message": "boom"},
            ]},
        });
        let condition = condition_from_manifest(&manifest, "Ready");
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.message, "boom");
    }

    #[test]
    fn condition_from_manifest_defaults_to_unknown() {
        let condition = condition_from_manifest(&json!({}), "Ready");
        assert_eq!(condition.status, ConditionStatus::Unknown);
    }
}
