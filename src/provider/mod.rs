//! Hosting-provider integration.
//!
//! Providers are optional: bootstrap works against any reachable remote
//! URL, and this trait only adds conveniences a hosting API offers, such as
//! creating the repository up front or registering the generated public key
//! as a read-only deploy key. Operations are idempotent and report whether
//! they changed anything.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub mod http;

pub use http::HostedForge;

/// Boxed future type returned by provider operations.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Visibility requested for a created repository.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RepositoryVisibility {
    /// Visible to the owning account only.
    #[default]
    Private,
    /// Publicly readable.
    Public,
}

/// Owner-qualified repository identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepositoryId {
    /// Owning user or organisation.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepositoryId {
    /// Creates an identifier from owner and name.
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepositoryId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self::new(owner, name))
            }
            _ => Err(format!("expected owner/name, got {value}")),
        }
    }
}

/// Errors surfaced by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Raised when the provider API cannot be reached.
    #[error("provider request failed: {message}")]
    Transport {
        /// Transport error string.
        message: String,
    },
    /// Raised when the provider API returns an error status.
    #[error("provider returned {status} for {operation}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Operation that failed.
        operation: String,
        /// Response body, if any.
        message: String,
    },
    /// Raised when a provider response cannot be decoded.
    #[error("failed to decode provider response: {message}")]
    Decode {
        /// Decoder error string.
        message: String,
    },
}

/// Optional hosting-provider conveniences used around bootstrap.
pub trait Provider: Send + Sync {
    /// Ensures the repository exists, creating it when absent. Returns
    /// `true` when this call created it.
    fn ensure_repository_exists<'a>(
        &'a self,
        id: &'a RepositoryId,
        visibility: RepositoryVisibility,
    ) -> ProviderFuture<'a, bool>;

    /// Registers `public_key` as a read-only deploy key. A key with the
    /// same material already registered is left alone. Returns `true` when
    /// this call added the key.
    fn register_deploy_key<'a>(
        &'a self,
        id: &'a RepositoryId,
        title: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, bool>;
}

/// Provider used when no hosting API is configured; never changes anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProvider;

impl Provider for NullProvider {
    fn ensure_repository_exists<'a>(
        &'a self,
        _id: &'a RepositoryId,
        _visibility: RepositoryVisibility,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async { Ok(false) })
    }

    fn register_deploy_key<'a>(
        &'a self,
        _id: &'a RepositoryId,
        _title: &'a str,
        _public_key: &'a str,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async { Ok(false) })
    }
}
