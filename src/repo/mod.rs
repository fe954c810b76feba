//! Repository driver abstraction.
//!
//! The driver owns a working copy of the bootstrap repository and exposes
//! the small set of operations the orchestrator needs: open (cloning or
//! initialising), write files, commit when the tree changed, push, and
//! resynchronise after a rejected push. Commits identify the tool, not a
//! person, so repeated runs are attributable.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

pub mod git;

pub use git::GitRepoDriver;

/// Authentication material for remote transport.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum RepoAuth {
    /// No explicit credentials; agent or anonymous transport.
    #[default]
    None,
    /// Username plus password or token over HTTP.
    Basic {
        /// Account or token owner name.
        username: String,
        /// Password or access token.
        password: String,
    },
    /// SSH private key, with optional pinned host identities.
    Key {
        /// PEM-encoded private key.
        private_key_pem: String,
        /// Optional key passphrase.
        passphrase: Option<String>,
        /// Pinned host identities in `known_hosts` format. When present,
        /// connections to unlisted hosts are refused.
        known_hosts: Option<String>,
        /// SSH user name, `git` for most hosting providers.
        username: String,
    },
}

/// Author identity stamped on generated commits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitAuthor {
    /// Author and committer name.
    pub name: String,
    /// Author and committer email address.
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: String::from("moor"),
            email: String::from("moor@localhost"),
        }
    }
}

/// Result of a commit attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommitOutcome {
    /// The tree changed and a commit was created.
    Committed {
        /// Identifier of the new commit.
        revision: String,
    },
    /// The tree already matched; the existing head is reported instead.
    Unchanged {
        /// Identifier of the current head commit.
        revision: String,
    },
}

impl CommitOutcome {
    /// Returns the revision the repository is at after the attempt.
    #[must_use]
    pub fn revision(&self) -> &str {
        match self {
            Self::Committed { revision } | Self::Unchanged { revision } => revision,
        }
    }
}

/// Errors surfaced by repository drivers.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Raised when an operation runs before [`RepoDriver::ensure_open`].
    #[error("repository has not been opened")]
    NotOpen,
    /// Raised when the working directory cannot be created.
    #[error("failed to create working directory: {message}")]
    Workspace {
        /// Operating system error string.
        message: String,
    },
    /// Raised for underlying version-control failures.
    #[error(transparent)]
    Git(#[from] git2::Error),
    /// Raised when the remote rejected a push as non-fast-forward.
    #[error("push of {reference} was rejected: {message}")]
    NonFastForward {
        /// Reference whose update was rejected.
        reference: String,
        /// Rejection message reported by the remote.
        message: String,
    },
    /// Raised when the remote host's identity does not match the pinned set.
    #[error("host identity for {host} does not match the pinned known_hosts entries")]
    HostIdentityMismatch {
        /// Host whose identity failed verification.
        host: String,
    },
    /// Raised when a branch is expected to have history but has none.
    #[error("branch {branch} has no commits")]
    EmptyRepository {
        /// Branch that was expected to exist.
        branch: String,
    },
    /// Raised when the working tree cannot be inspected.
    #[error("failed to inspect working tree entry {path}: {message}")]
    Inspect {
        /// Entry that failed inspection.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a file cannot be written into the working tree.
    #[error("failed to write {path}: {message}")]
    Write {
        /// File that failed to write.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Operations the orchestrator performs against the bootstrap repository.
pub trait RepoDriver {
    /// Opens the repository: clones `url` at `branch`, or initialises a
    /// fresh history when the remote is empty or the branch is absent.
    /// Returns `true` when a fresh history was initialised.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] when neither cloning nor initialising succeeds.
    fn ensure_open(&mut self, url: &str, branch: &str) -> Result<bool, RepoError>;

    /// Writes `content` at `path` relative to the working tree root,
    /// creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::NotOpen`] before [`RepoDriver::ensure_open`] and
    /// [`RepoError::Write`] on filesystem failures.
    fn write_file(&self, path: &Utf8Path, content: &str) -> Result<(), RepoError>;

    /// Stages every change in the working tree and commits it, unless the
    /// tree already matches the head commit.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] when staging or committing fails.
    fn commit_if_changed(
        &self,
        author: &CommitAuthor,
        message: &str,
    ) -> Result<CommitOutcome, RepoError>;

    /// Pushes the branch to the remote.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::NonFastForward`] when the remote rejects the
    /// update because it has newer history, and other [`RepoError`] values
    /// for transport failures.
    fn push(&self, branch: &str) -> Result<(), RepoError>;

    /// Discards local history and matches the remote branch exactly.
    /// A remote branch that no longer exists leaves the local state alone.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] when fetching or resetting fails.
    fn resync(&self, branch: &str) -> Result<(), RepoError>;

    /// Returns the identifier of the current head commit.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::EmptyRepository`] when no commit exists yet.
    fn head_revision(&self) -> Result<String, RepoError>;

    /// Returns `true` when the working tree has no uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] when the tree cannot be inspected.
    fn is_clean(&self) -> Result<bool, RepoError>;

    /// Returns the working tree root.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::NotOpen`] before [`RepoDriver::ensure_open`].
    fn workdir(&self) -> Result<&Utf8Path, RepoError>;
}
