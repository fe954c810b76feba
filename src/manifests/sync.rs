//! Sync-pointer artifact set: the descriptors that tell the environment
//! where to pull desired state from after bootstrap completes.

use std::time::Duration;

use camino::Utf8PathBuf;

use super::{ArtifactFile, ArtifactSet, ENTRY_POINT_FILE, artifact_root};

/// Name of the rendered sync-pointer artifact.
pub const SYNC_FILE: &str = "sync.yaml";

/// Parameters for rendering the sync-pointer set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncOptions {
    /// Name shared by the source and pipeline descriptors.
    pub name: String,
    /// Logical namespace the descriptors live in.
    pub namespace: String,
    /// Repository URL the environment pulls from.
    pub url: String,
    /// Branch the environment tracks.
    pub branch: String,
    /// Name of the credential secret the source descriptor references.
    pub secret_name: String,
    /// Path inside the repository the artifacts are rendered under.
    pub target_path: String,
    /// Reconciliation interval.
    pub interval: Duration,
}

impl SyncOptions {
    /// Object references rendered by [`render`], in document order.
    #[must_use]
    pub fn object_names(&self) -> [(String, String); 2] {
        [
            (String::from("GitSource"), self.name.clone()),
            (String::from("SyncPipeline"), self.name.clone()),
        ]
    }
}

/// Renders the sync-pointer artifact set for the given options.
///
/// The returned set replaces the installation set's entry point with one
/// that also lists [`SYNC_FILE`], so applying the directory after this
/// render picks up both sets.
#[must_use]
pub fn render(options: &SyncOptions) -> ArtifactSet {
    let root = artifact_root(&options.target_path, &options.namespace);

    let entry = String::from(
        "resources:\n  - components.yaml\n  - rbac.yaml\n  - sync.yaml\n",
    );

    ArtifactSet::new(vec![
        ArtifactFile {
            path: root.join(SYNC_FILE),
            content: render_sync(options),
        },
        ArtifactFile {
            path: root.join(ENTRY_POINT_FILE),
            content: entry,
        },
    ])
}

/// Returns the repository-relative directory the set is rendered under.
#[must_use]
pub fn render_root(options: &SyncOptions) -> Utf8PathBuf {
    artifact_root(&options.target_path, &options.namespace)
}

fn render_sync(options: &SyncOptions) -> String {
    let interval = format_interval(options.interval);
    let SyncOptions {
        name,
        namespace,
        url,
        branch,
        secret_name,
        target_path,
        interval: _,
    } = options;
    let path = if target_path.trim_matches('/').is_empty() {
        String::from("./")
    } else {
        format!("./{}", target_path.trim_matches('/'))
    };
    format!(
        "\
---
apiVersion: moor.dev/v1
kind: GitSource
metadata:
  name: {name}
  namespace: {namespace}
spec:
  interval: {interval}
  url: {url}
  ref:
    branch: {branch}
  secretRef:
    name: {secret_name}
---
apiVersion: moor.dev/v1
kind: SyncPipeline
metadata:
  name: {name}
  namespace: {namespace}
spec:
  interval: {interval}
  path: {path}
  prune: true
  sourceRef:
    kind: GitSource
    name: {name}
"
    )
}

/// Renders a duration in whole seconds, the shortest form the sync
/// descriptors accept.
fn format_interval(interval: Duration) -> String {
    format!("{}s", interval.as_secs().max(1))
}
