//! Command-line interface definitions for the `moor` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `moor` binary.
#[derive(Debug, Parser)]
#[command(
    name = "moor",
    about = "Bootstrap an environment to continuously reconcile from a git repository",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the full bootstrap sequence against a repository and environment.
    #[command(
        name = "bootstrap",
        about = "Install the components, provision credentials, and point the environment at a repository"
    )]
    Bootstrap(BootstrapCommand),
    /// Install or export the component manifests only.
    #[command(
        name = "install",
        about = "Install the components, or export their manifests"
    )]
    Install(InstallCommand),
}

/// Arguments for the `moor bootstrap` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BootstrapCommand {
    /// Repository URL the environment will pull desired state from.
    #[arg(long, value_name = "URL")]
    pub(crate) url: String,
    /// Branch holding the desired state.
    #[arg(long, value_name = "BRANCH")]
    pub(crate) branch: Option<String>,
    /// Base URL of the target environment's API.
    #[arg(long, value_name = "URL")]
    pub(crate) environment_url: Option<String>,
    /// Bearer token for the environment API.
    #[arg(long, value_name = "TOKEN", env = "MOOR_ENVIRONMENT_TOKEN")]
    pub(crate) environment_token: Option<String>,
    /// Logical namespace receiving the components.
    #[arg(long, value_name = "NAMESPACE")]
    pub(crate) namespace: Option<String>,
    /// Path inside the repository the artifacts are rendered under.
    #[arg(long, value_name = "PATH")]
    pub(crate) path: Option<String>,
    /// Comma-separated component agents to deploy.
    #[arg(long, value_name = "LIST")]
    pub(crate) components: Option<String>,
    /// Username for HTTP(S) repository access.
    #[arg(
        long,
        value_name = "USER",
        requires = "password",
        conflicts_with_all = ["tls_cert", "tls_key", "tls_ca"]
    )]
    pub(crate) username: Option<String>,
    /// Password or token for HTTP(S) repository access.
    #[arg(long, value_name = "PASSWORD", env = "MOOR_PASSWORD")]
    pub(crate) password: Option<String>,
    /// Client TLS certificate for HTTPS repository access.
    #[arg(long, value_name = "PATH", requires = "tls_key")]
    pub(crate) tls_cert: Option<String>,
    /// Client TLS private key for HTTPS repository access.
    #[arg(long, value_name = "PATH", requires = "tls_cert")]
    pub(crate) tls_key: Option<String>,
    /// Certificate-authority bundle for HTTPS repository access.
    #[arg(long, value_name = "PATH")]
    pub(crate) tls_ca: Option<String>,
    /// Key algorithm for generated SSH credentials.
    #[arg(long, value_name = "ALGORITHM", default_value = "ed25519")]
    pub(crate) key_algorithm: String,
    /// Generate fresh credentials even when a usable secret exists.
    #[arg(long)]
    pub(crate) rotate_credentials: bool,
    /// Wait for interactive confirmation after displaying a generated key.
    #[arg(long)]
    pub(crate) confirm: bool,
    /// Owner-qualified repository to create via the provider API.
    #[arg(long, value_name = "OWNER/NAME")]
    pub(crate) repository: Option<String>,
    /// Create the provider repository publicly readable.
    #[arg(long)]
    pub(crate) public: bool,
    /// Reconciliation interval in seconds.
    #[arg(long, value_name = "SECS")]
    pub(crate) interval: Option<u64>,
    /// Readiness deadline in seconds.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,
}

/// Arguments for the `moor install` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct InstallCommand {
    /// Print the rendered manifests instead of applying them.
    #[arg(long)]
    pub(crate) export: bool,
    /// Base URL of the target environment's API.
    #[arg(long, value_name = "URL")]
    pub(crate) environment_url: Option<String>,
    /// Logical namespace receiving the components.
    #[arg(long, value_name = "NAMESPACE")]
    pub(crate) namespace: Option<String>,
    /// Comma-separated component agents to deploy.
    #[arg(long, value_name = "LIST")]
    pub(crate) components: Option<String>,
    /// Container registry the component images are pulled from.
    #[arg(long, value_name = "REGISTRY")]
    pub(crate) registry: Option<String>,
    /// Image tag shared by all components.
    #[arg(long, value_name = "TAG")]
    pub(crate) image_tag: Option<String>,
    /// Path inside the repository the artifacts are rendered under.
    #[arg(long, value_name = "PATH")]
    pub(crate) path: Option<String>,
}
