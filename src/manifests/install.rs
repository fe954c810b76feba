//! Installation artifact set: the component manifests.

use camino::Utf8PathBuf;

use super::{ArtifactFile, ArtifactSet, ENTRY_POINT_FILE, artifact_root};

/// Default logical namespace the components are installed into.
pub const DEFAULT_NAMESPACE: &str = "moor-system";

/// Default set of component agents.
pub const DEFAULT_COMPONENTS: [&str; 2] = ["source-agent", "apply-agent"];

/// Parameters for rendering the installation set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallOptions {
    /// Logical namespace receiving the components.
    pub namespace: String,
    /// Component agents to deploy.
    pub components: Vec<String>,
    /// Container registry the component images are pulled from.
    pub registry: String,
    /// Image tag shared by all components.
    pub image_tag: String,
    /// Whether agents watch all namespaces or only their own.
    pub watch_all_namespaces: bool,
    /// Path inside the repository the artifacts are rendered under.
    pub target_path: String,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            namespace: String::from(DEFAULT_NAMESPACE),
            components: DEFAULT_COMPONENTS.iter().map(|&c| c.to_owned()).collect(),
            registry: String::from("ghcr.io/moor-cd"),
            image_tag: String::from("latest"),
            watch_all_namespaces: true,
            target_path: String::new(),
        }
    }
}

// The access-control artifact is a pre-built composite rather than a
// rendered template, so namespace overrides are applied to it afterwards by
// targeted substitution (see `rewrite_namespace`).
const RBAC_MANIFEST: &str = "\
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: moor-reconciler
  namespace: moor-system
  labels:
    app.kubernetes.io/part-of: moor
---
apiVersion: rbac/v1
kind: RoleBinding
metadata:
  name: moor-reconciler
  namespace: moor-system
  labels:
    app.kubernetes.io/part-of: moor
roleRef:
  kind: ClusterRole
  name: cluster-admin
subjects:
  - kind: ServiceAccount
    name: moor-reconciler
    namespace: moor-system
";

/// Renders the installation artifact set for the given options.
#[must_use]
pub fn render(options: &InstallOptions) -> ArtifactSet {
    let root = artifact_root(&options.target_path, &options.namespace);

    let mut components = render_namespace(&options.namespace);
    for component in &options.components {
        components.push_str(&render_component(options, component));
    }

    let entry = String::from("resources:\n  - components.yaml\n  - rbac.yaml\n");

    ArtifactSet::new(vec![
        ArtifactFile {
            path: root.join("components.yaml"),
            content: components,
        },
        ArtifactFile {
            path: root.join("rbac.yaml"),
            content: rewrite_namespace(RBAC_MANIFEST, &options.namespace),
        },
        ArtifactFile {
            path: root.join(ENTRY_POINT_FILE),
            content: entry,
        },
    ])
}

/// Returns the repository-relative directory the set is rendered under.
#[must_use]
pub fn render_root(options: &InstallOptions) -> Utf8PathBuf {
    artifact_root(&options.target_path, &options.namespace)
}

fn render_namespace(namespace: &str) -> String {
    format!(
        "\
---
apiVersion: v1
kind: Namespace
metadata:
  name: {namespace}
  labels:
    app.kubernetes.io/part-of: moor
"
    )
}

fn render_component(options: &InstallOptions, component: &str) -> String {
    let InstallOptions {
        namespace,
        registry,
        image_tag,
        watch_all_namespaces,
        ..
    } = options;
    format!(
        "\
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {component}
  namespace: {namespace}
  labels:
    app.kubernetes.io/part-of: moor
    app.kubernetes.io/component: {component}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {component}
  template:
    metadata:
      labels:
        app: {component}
    spec:
      serviceAccountName: moor-reconciler
      containers:
        - name: manager
          image: {registry}/{component}:{image_tag}
          args:
            - --watch-all-namespaces={watch_all_namespaces}
"
    )
}

/// Rewrites namespace-qualified references inside the access-control
/// composite when a non-default namespace is requested. Confined to that
/// one artifact; the templated artifacts take the namespace as a parameter.
fn rewrite_namespace(manifest: &str, namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        return manifest.to_owned();
    }
    manifest.replace(DEFAULT_NAMESPACE, namespace)
}
