//! Core library for the moor GitOps bootstrap tool.
//!
//! The crate turns a git repository into the source of truth for a target
//! environment: it commits the component manifests, applies them, provisions
//! pull credentials, and waits until the environment reports that it is
//! reconciling from the repository. Every operation is idempotent so a
//! failed run can simply be repeated.

pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod environment;
pub mod manifests;
pub mod provider;
pub mod repo;
pub mod test_support;

pub use bootstrap::{
    BootstrapError, BootstrapOrchestrator, BootstrapOutcome, BootstrapPlan, ConfirmFn, Step,
    remote_host,
};
pub use config::{BootstrapConfig, ConfigError};
pub use credentials::{
    CommandRunner, CredentialBundle, CredentialError, CredentialProvisioner, CredentialRequest,
    CredentialSource, HostScanner, PrivateKeyAlgorithm, ProcessCommandRunner,
    ProvisionedCredential, ScanError, SshKeyMaterial,
};
pub use environment::{
    Applier, ApplyError, ApplySummary, Condition, ConditionStatus, EnvObject, EnvironmentClient,
    EnvironmentError, ObjectRef, PollError, ReadinessTarget, RestEnvironmentClient, poll_ready,
};
pub use manifests::{ArtifactFile, ArtifactSet, InstallOptions, ManifestError, SyncOptions};
pub use provider::{
    HostedForge, NullProvider, Provider, ProviderError, RepositoryId, RepositoryVisibility,
};
pub use repo::{
    CommitAuthor, CommitOutcome, GitRepoDriver, RepoAuth, RepoDriver, RepoError,
};
