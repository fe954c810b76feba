//! Bootstrap orchestration.
//!
//! One `execute` call drives the full convergence sequence: validate the
//! plan, make sure the repository exists and is open, publish and apply the
//! installation artifacts, wait for the components, provision the access
//! credential, then publish and apply the sync descriptors and wait for
//! them. Every step is idempotent, so re-running a partially-completed
//! bootstrap finishes the remaining work without duplicating the rest.

use std::time::Duration;

use camino::Utf8Path;
use tracing::{debug, info};

use crate::credentials::{
    CommandRunner, CredentialProvisioner, CredentialRequest, CredentialSource,
};
use crate::environment::apply::Applier;
use crate::environment::poll::{ReadinessTarget, poll_ready};
use crate::environment::{EnvironmentClient, ObjectRef};
use crate::manifests::{self, ArtifactSet, InstallOptions, SyncOptions};
use crate::provider::{NullProvider, Provider, RepositoryId, RepositoryVisibility};
use crate::repo::{CommitAuthor, CommitOutcome, RepoDriver, RepoError};

pub mod error;

pub use error::{BootstrapError, Step};

/// Maximum push attempts before giving up on a contended branch.
const PUSH_ATTEMPTS: u32 = 3;
/// Initial delay between push attempts; doubles each retry.
const PUSH_BACKOFF: Duration = Duration::from_secs(1);

/// Callback shown the generated public key; returns `false` to cancel.
pub type ConfirmFn = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Everything one bootstrap run needs to know.
#[derive(Debug)]
pub struct BootstrapPlan {
    /// Repository URL the environment will pull from.
    pub url: String,
    /// Branch holding the desired state.
    pub branch: String,
    /// Logical namespace receiving the components.
    pub namespace: String,
    /// Path inside the repository the artifacts are rendered under.
    pub target_path: String,
    /// Component agents to deploy.
    pub components: Vec<String>,
    /// Container registry the component images are pulled from.
    pub registry: String,
    /// Image tag shared by all components.
    pub image_tag: String,
    /// Whether agents watch all namespaces or only their own.
    pub watch_all_namespaces: bool,
    /// Author identity stamped on generated commits.
    pub author: CommitAuthor,
    /// Reconciliation interval written into the sync descriptors.
    pub interval: Duration,
    /// Delay between readiness probes.
    pub poll_interval: Duration,
    /// Overall deadline for each readiness wait.
    pub timeout: Duration,
    /// Credential to provision for the environment's pull access.
    pub credential: CredentialRequest,
    /// Whether an existing usable secret short-circuits generation.
    pub reuse_existing_credentials: bool,
    /// Provider-side repository to create or register keys against.
    pub repository: Option<RepositoryId>,
    /// Visibility used when the provider creates the repository.
    pub visibility: RepositoryVisibility,
}

impl BootstrapPlan {
    /// Checks the plan for contradictions before any side effects.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Validation`] naming the first problem.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        let invalid = |message: String| BootstrapError::Validation { message };
        if self.url.trim().is_empty() {
            return Err(invalid(String::from("repository url must not be empty")));
        }
        if self.branch.trim().is_empty() {
            return Err(invalid(String::from("branch must not be empty")));
        }
        if self.namespace.trim().is_empty() {
            return Err(invalid(String::from("namespace must not be empty")));
        }
        if self.components.is_empty() {
            return Err(invalid(String::from(
                "at least one component must be selected",
            )));
        }

        let http_url = self.url.starts_with("http://") || self.url.starts_with("https://");
        match &self.credential {
            CredentialRequest::SshKey { .. } if http_url => Err(invalid(String::from(
                "ssh key credentials require an ssh repository url",
            ))),
            CredentialRequest::Basic { .. } | CredentialRequest::Tls { .. } if !http_url => {
                Err(invalid(String::from(
                    "basic and tls credentials require an http(s) repository url",
                )))
            }
            _ => Ok(()),
        }
    }

    fn install_options(&self) -> InstallOptions {
        InstallOptions {
            namespace: self.namespace.clone(),
            components: self.components.clone(),
            registry: self.registry.clone(),
            image_tag: self.image_tag.clone(),
            watch_all_namespaces: self.watch_all_namespaces,
            target_path: self.target_path.clone(),
        }
    }

    fn sync_options(&self, secret_name: &str) -> SyncOptions {
        SyncOptions {
            name: self.namespace.clone(),
            namespace: self.namespace.clone(),
            url: self.url.clone(),
            branch: self.branch.clone(),
            secret_name: secret_name.to_owned(),
            target_path: self.target_path.clone(),
            interval: self.interval,
        }
    }
}

/// What a completed bootstrap run did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapOutcome {
    /// `true` when the repository history was initialised by this run.
    pub fresh_repository: bool,
    /// `true` when the provider created the repository during this run.
    pub repository_created: bool,
    /// Revision holding the installation artifacts.
    pub install_revision: String,
    /// Revision holding the sync descriptors.
    pub sync_revision: String,
    /// Whether the credential was reused or generated.
    pub credential_source: CredentialSource,
    /// `true` when a deploy key was registered during this run.
    pub deploy_key_registered: bool,
}

/// Drives a bootstrap run over injected collaborators.
pub struct BootstrapOrchestrator<D, E, R, P = NullProvider>
where
    D: RepoDriver,
    E: EnvironmentClient,
    R: CommandRunner,
    P: Provider,
{
    plan: BootstrapPlan,
    driver: D,
    client: E,
    provisioner: CredentialProvisioner<R>,
    provider: Option<P>,
    confirm: Option<ConfirmFn>,
}

impl<D, E, R> BootstrapOrchestrator<D, E, R, NullProvider>
where
    D: RepoDriver,
    E: EnvironmentClient,
    R: CommandRunner,
{
    /// Creates an orchestrator with no hosting provider.
    #[must_use]
    pub const fn new(
        plan: BootstrapPlan,
        driver: D,
        client: E,
        provisioner: CredentialProvisioner<R>,
    ) -> Self {
        Self {
            plan,
            driver,
            client,
            provisioner,
            provider: None,
            confirm: None,
        }
    }
}

impl<D, E, R, P> BootstrapOrchestrator<D, E, R, P>
where
    D: RepoDriver,
    E: EnvironmentClient,
    R: CommandRunner,
    P: Provider,
{
    /// Attaches a hosting provider.
    #[must_use]
    pub fn with_provider<P2: Provider>(
        self,
        provider: P2,
    ) -> BootstrapOrchestrator<D, E, R, P2> {
        BootstrapOrchestrator {
            plan: self.plan,
            driver: self.driver,
            client: self.client,
            provisioner: self.provisioner,
            provider: Some(provider),
            confirm: self.confirm,
        }
    }

    /// Attaches a confirmation callback for freshly-generated public keys.
    #[must_use]
    pub fn with_confirmation(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Runs the full bootstrap sequence.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] naming the failed step. Steps already
    /// completed stay completed; re-running after the cause is fixed
    /// finishes the remaining work.
    pub async fn execute(self) -> Result<BootstrapOutcome, BootstrapError> {
        let Self {
            plan,
            mut driver,
            client,
            provisioner,
            provider,
            confirm,
        } = self;

        plan.validate()?;
        client
            .list("Namespace", None)
            .await
            .map_err(|source| BootstrapError::Environment {
                step: Step::Validate,
                source,
            })?;
        debug!(url = %plan.url, branch = %plan.branch, "plan validated");

        let repository_created = match (&provider, &plan.repository) {
            (Some(forge), Some(id)) => {
                let created = forge
                    .ensure_repository_exists(id, plan.visibility)
                    .await
                    .map_err(|source| BootstrapError::Provider {
                        step: Step::EnsureRepository,
                        source,
                    })?;
                if created {
                    info!(repository = %id, "created repository");
                }
                created
            }
            _ => false,
        };

        let fresh_repository = driver
            .ensure_open(&plan.url, &plan.branch)
            .map_err(|source| BootstrapError::Repository {
                step: Step::OpenRepository,
                source,
            })?;
        info!(fresh = fresh_repository, "repository open");

        let install_options = plan.install_options();
        let install_set = manifests::install::render(&install_options);
        let install_revision = publish(
            &mut driver,
            &plan,
            &install_set,
            "Add bootstrap components",
            Step::PushInstall,
        )
        .await?;
        info!(revision = %install_revision, "installation artifacts published");

        let artifact_dir = driver
            .workdir()
            .map_err(|source| BootstrapError::Repository {
                step: Step::ApplyInstall,
                source,
            })?
            .join(manifests::install::render_root(&install_options));

        let applier = Applier::new(&client);
        let summary = applier
            .apply(&artifact_dir)
            .await
            .map_err(|source| BootstrapError::Apply {
                step: Step::ApplyInstall,
                source,
            })?;
        debug!(created = summary.created, updated = summary.updated, "installation applied");

        let install_targets: Vec<ReadinessTarget> = plan
            .components
            .iter()
            .map(|component| {
                ReadinessTarget::ready(ObjectRef::namespaced(
                    "Deployment",
                    &plan.namespace,
                    component,
                ))
            })
            .collect();
        poll_ready(&client, &install_targets, plan.poll_interval, plan.timeout)
            .await
            .map_err(|source| BootstrapError::Readiness {
                step: Step::WaitInstall,
                source,
            })?;
        info!("components ready");

        let secret_name = plan.namespace.clone();
        let credential = provisioner
            .provision(
                &client,
                &secret_name,
                &plan.namespace,
                &plan.credential,
                plan.reuse_existing_credentials,
            )
            .await
            .map_err(|source| BootstrapError::Credential {
                step: Step::ProvisionCredential,
                source,
            })?;
        if credential.source == CredentialSource::Generated {
            if let (Some(material), Some(ask)) = (credential.bundle.ssh_material(), &confirm) {
                if !ask(&material.public_key_openssh) {
                    return Err(BootstrapError::ConfirmationDeclined);
                }
            }
        }

        let secret =
            manifests::secret::credential_secret(&secret_name, &plan.namespace, &credential.bundle);
        applier
            .apply_object(&secret)
            .await
            .map_err(|source| BootstrapError::Apply {
                step: Step::ApplyCredential,
                source,
            })?;
        info!(source = ?credential.source, "credential secret applied");

        let deploy_key_registered = match (
            &provider,
            &plan.repository,
            credential.bundle.ssh_material(),
        ) {
            (Some(forge), Some(id), Some(material)) => forge
                .register_deploy_key(id, &secret_name, &material.public_key_openssh)
                .await
                .map_err(|source| BootstrapError::Provider {
                    step: Step::RegisterDeployKey,
                    source,
                })?,
            _ => false,
        };

        let sync_options = plan.sync_options(&secret_name);
        let sync_set = manifests::sync::render(&sync_options);
        let sync_revision = publish(
            &mut driver,
            &plan,
            &sync_set,
            "Add sync descriptors",
            Step::PushSync,
        )
        .await?;
        info!(revision = %sync_revision, "sync descriptors published");

        applier
            .apply(&artifact_dir)
            .await
            .map_err(|source| BootstrapError::Apply {
                step: Step::ApplySync,
                source,
            })?;

        let sync_targets = [
            ReadinessTarget::ready(ObjectRef::namespaced(
                "GitSource",
                &plan.namespace,
                &sync_options.name,
            )),
            ReadinessTarget::ready(ObjectRef::namespaced(
                "SyncPipeline",
                &plan.namespace,
                &sync_options.name,
            )),
        ];
        poll_ready(&client, &sync_targets, plan.poll_interval, plan.timeout)
            .await
            .map_err(|source| BootstrapError::Readiness {
                step: Step::WaitSync,
                source,
            })?;
        info!("environment is reconciling from the repository");

        Ok(BootstrapOutcome {
            fresh_repository,
            repository_created,
            install_revision,
            sync_revision,
            credential_source: credential.source,
            deploy_key_registered,
        })
    }
}

/// Writes the artifact set into the working tree, commits it when the tree
/// changed, and pushes, resynchronising and retrying on contended pushes.
async fn publish<D: RepoDriver>(
    driver: &mut D,
    plan: &BootstrapPlan,
    set: &ArtifactSet,
    message: &str,
    step: Step,
) -> Result<String, BootstrapError> {
    let repository = |source| BootstrapError::Repository { step, source };
    let mut backoff = PUSH_BACKOFF;

    for attempt in 1..=PUSH_ATTEMPTS {
        write_artifacts(driver, set, step)?;
        let outcome = driver
            .commit_if_changed(&plan.author, message)
            .map_err(repository)?;

        let revision = match outcome {
            // Tree already matches; the remote was the source of it, so
            // there is nothing to push.
            CommitOutcome::Unchanged { revision } => return Ok(revision),
            CommitOutcome::Committed { revision } => revision,
        };

        match driver.push(&plan.branch) {
            Ok(()) => return Ok(revision),
            Err(source @ RepoError::NonFastForward { .. }) => {
                if attempt == PUSH_ATTEMPTS {
                    return Err(BootstrapError::PushExhausted {
                        step,
                        attempts: PUSH_ATTEMPTS,
                        source,
                    });
                }
                debug!(attempt, "push rejected; resynchronising");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                driver.resync(&plan.branch).map_err(repository)?;
            }
            Err(source) => return Err(repository(source)),
        }
    }

    // The loop always returns from its final attempt.
    Err(BootstrapError::Repository {
        step,
        source: RepoError::NotOpen,
    })
}

fn write_artifacts<D: RepoDriver>(
    driver: &D,
    set: &ArtifactSet,
    step: Step,
) -> Result<(), BootstrapError> {
    let repository = |source| BootstrapError::Repository { step, source };
    let workdir = driver.workdir().map_err(repository)?;
    for file in set.files() {
        // The sync render extends the entry point the install render wrote.
        // A committed entry point that already lists everything this set
        // lists stays untouched, so a re-run's install step does not strip
        // the sync descriptor back out and create a spurious commit.
        if file.path.file_name() == Some(manifests::ENTRY_POINT_FILE)
            && entry_point_covers(&workdir.join(&file.path), &file.content)
        {
            continue;
        }
        driver
            .write_file(&file.path, &file.content)
            .map_err(repository)?;
    }
    Ok(())
}

/// True when an existing entry point already lists every resource the
/// rendered one does.
fn entry_point_covers(path: &Utf8Path, rendered: &str) -> bool {
    let Ok(existing) = std::fs::read_to_string(path) else {
        return false;
    };
    let listed: Vec<&str> = existing.lines().map(str::trim).collect();
    rendered
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("- "))
        .all(|resource| listed.contains(&resource))
}

/// Extracts the host and port from an SSH-style repository URL. Returns
/// `None` for HTTP(S) and other non-SSH URLs.
#[must_use]
pub fn remote_host(url: &str) -> Option<(String, u16)> {
    if let Some(rest) = url.strip_prefix("ssh://") {
        let authority = rest.split('/').next()?;
        let host_port = authority.rsplit('@').next()?;
        return match host_port.split_once(':') {
            Some((host, port)) => Some((host.to_owned(), port.parse().ok()?)),
            None => Some((host_port.to_owned(), 22)),
        };
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return None;
    }
    // scp-style: user@host:path
    let (_, rest) = url.split_once('@')?;
    let (host, _) = rest.split_once(':')?;
    Some((host.to_owned(), 22))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superset_entry_points_are_left_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("kustomization.yaml"))
            .expect("utf-8 path");
        std::fs::write(
            &path,
            "resources:\n  - components.yaml\n  - rbac.yaml\n  - sync.yaml\n",
        )
        .expect("write entry point");

        let install_entry = "resources:\n  - components.yaml\n  - rbac.yaml\n";
        assert!(entry_point_covers(&path, install_entry));
        assert!(!entry_point_covers(&path, "resources:\n  - extra.yaml\n"));
        assert!(!entry_point_covers(&path.join("absent"), install_entry));
    }

    #[test]
    fn remote_host_parses_ssh_urls() {
        assert_eq!(
            remote_host("ssh://git@git.example.com:2222/ops/fleet.git"),
            Some((String::from("git.example.com"), 2222))
        );
        assert_eq!(
            remote_host("ssh://git@git.example.com/ops/fleet.git"),
            Some((String::from("git.example.com"), 22))
        );
        assert_eq!(
            remote_host("git@git.example.com:ops/fleet.git"),
            Some((String::from("git.example.com"), 22))
        );
        assert_eq!(remote_host("https://git.example.com/ops/fleet.git"), None);
    }

    #[test]
    fn plan_validation_rejects_mismatched_credentials() {
        let plan = BootstrapPlan {
            url: String::from("https://git.example.com/ops/fleet.git"),
            branch: String::from("main"),
            namespace: String::from("moor-system"),
            target_path: String::new(),
            components: vec![String::from("source-agent")],
            registry: String::from("ghcr.io/moor-cd"),
            image_tag: String::from("latest"),
            watch_all_namespaces: true,
            author: CommitAuthor::default(),
            interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            credential: CredentialRequest::SshKey {
                algorithm: crate::credentials::PrivateKeyAlgorithm::Ed25519,
                host: String::from("git.example.com"),
                port: 22,
            },
            reuse_existing_credentials: true,
            repository: None,
            visibility: RepositoryVisibility::Private,
        };
        let err = plan.validate().expect_err("mismatch should fail");
        assert!(matches!(err, BootstrapError::Validation { .. }));
    }
}
