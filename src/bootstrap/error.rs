//! Bootstrap error taxonomy.
//!
//! Every failure names the step it happened in so a partially-completed run
//! can be diagnosed and resumed; each step is idempotent, so re-running the
//! whole bootstrap after fixing the cause is always safe.

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::environment::apply::ApplyError;
use crate::environment::poll::PollError;
use crate::environment::EnvironmentError;
use crate::manifests::ManifestError;
use crate::provider::ProviderError;
use crate::repo::RepoError;

/// The bootstrap step a failure occurred in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Plan validation and environment reachability.
    Validate,
    /// Provider-side repository creation.
    EnsureRepository,
    /// Cloning or initialising the repository.
    OpenRepository,
    /// Committing and pushing the installation artifacts.
    PushInstall,
    /// Applying the installation artifacts.
    ApplyInstall,
    /// Waiting for the installed components to become ready.
    WaitInstall,
    /// Provisioning the access credential.
    ProvisionCredential,
    /// Applying the credential secret.
    ApplyCredential,
    /// Registering the deploy key with the provider.
    RegisterDeployKey,
    /// Committing and pushing the sync descriptors.
    PushSync,
    /// Applying the sync descriptors.
    ApplySync,
    /// Waiting for the sync descriptors to become ready.
    WaitSync,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Validate => "validation",
            Self::EnsureRepository => "repository creation",
            Self::OpenRepository => "repository open",
            Self::PushInstall => "install publication",
            Self::ApplyInstall => "install application",
            Self::WaitInstall => "install readiness",
            Self::ProvisionCredential => "credential provisioning",
            Self::ApplyCredential => "credential application",
            Self::RegisterDeployKey => "deploy key registration",
            Self::PushSync => "sync publication",
            Self::ApplySync => "sync application",
            Self::WaitSync => "sync readiness",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the bootstrap orchestrator.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Raised when the plan fails validation before any side effects.
    #[error("invalid bootstrap plan: {message}")]
    Validation {
        /// What was wrong with the plan.
        message: String,
    },
    /// Raised when the environment cannot be reached or written.
    #[error("{step} failed: {source}")]
    Environment {
        /// Step the failure occurred in.
        step: Step,
        /// Underlying client error.
        #[source]
        source: EnvironmentError,
    },
    /// Raised when a repository operation fails.
    #[error("{step} failed: {source}")]
    Repository {
        /// Step the failure occurred in.
        step: Step,
        /// Underlying driver error.
        #[source]
        source: RepoError,
    },
    /// Raised when pushes keep being rejected after resynchronising.
    #[error("{step} gave up after {attempts} rejected pushes: {source}")]
    PushExhausted {
        /// Step the failure occurred in.
        step: Step,
        /// Number of attempts made.
        attempts: u32,
        /// Final rejection.
        #[source]
        source: RepoError,
    },
    /// Raised when artifacts cannot be written into the working tree.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// Raised when applying artifacts to the environment fails.
    #[error("{step} failed: {source}")]
    Apply {
        /// Step the failure occurred in.
        step: Step,
        /// Underlying apply error.
        #[source]
        source: ApplyError,
    },
    /// Raised when a readiness wait fails or times out.
    #[error("{step} failed: {source}")]
    Readiness {
        /// Step the failure occurred in.
        step: Step,
        /// Underlying poll error.
        #[source]
        source: PollError,
    },
    /// Raised when credential provisioning fails.
    #[error("{step} failed: {source}")]
    Credential {
        /// Step the failure occurred in.
        step: Step,
        /// Underlying provisioning error.
        #[source]
        source: CredentialError,
    },
    /// Raised when the operator declines the displayed public key.
    #[error("bootstrap cancelled: generated key was not confirmed")]
    ConfirmationDeclined,
    /// Raised when a provider operation fails.
    #[error("{step} failed: {source}")]
    Provider {
        /// Step the failure occurred in.
        step: Step,
        /// Underlying provider error.
        #[source]
        source: ProviderError,
    },
}
