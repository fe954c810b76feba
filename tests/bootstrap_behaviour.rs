//! End-to-end bootstrap runs: a real git driver against a bare local remote,
//! with the in-memory environment, scripted host scans, and the recording
//! provider standing in for the external services.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use camino::Utf8Path;
use moor::credentials::{
    CredentialProvisioner, CredentialRequest, CredentialSource, HostScanner, PrivateKeyAlgorithm,
};
use moor::environment::ObjectRef;
use moor::provider::{RepositoryId, RepositoryVisibility};
use moor::repo::{CommitAuthor, CommitOutcome, GitRepoDriver, RepoAuth, RepoDriver, RepoError};
use moor::test_support::{MemoryEnvironment, RecordingProvider, ScriptedScanRunner};
use moor::{BootstrapError, BootstrapOrchestrator, BootstrapOutcome, BootstrapPlan, Step};

#[path = "common/test_constants.rs"]
mod test_constants;

use test_constants::{BRANCH, NAMESPACE, SCANNED_HOST_KEY};

/// A bare repository on disk plus the shared in-memory environment.
struct Harness {
    env: MemoryEnvironment,
    url: String,
    _remote: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let remote = tempfile::tempdir().expect("temporary directory");
        let path = remote.path().join("remote.git");
        git2::Repository::init_bare(&path).expect("bare repository");
        Self {
            env: MemoryEnvironment::new(),
            url: path.to_str().expect("utf-8 path").to_owned(),
            _remote: remote,
        }
    }

    fn plan(&self) -> BootstrapPlan {
        BootstrapPlan {
            url: self.url.clone(),
            branch: String::from(BRANCH),
            namespace: String::from(NAMESPACE),
            target_path: String::new(),
            components: vec![String::from("source-agent"), String::from("apply-agent")],
            registry: String::from("ghcr.io/moor-cd"),
            image_tag: String::from("latest"),
            watch_all_namespaces: true,
            author: CommitAuthor::default(),
            interval: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            credential: CredentialRequest::SshKey {
                algorithm: PrivateKeyAlgorithm::Ed25519,
                host: String::from("git.example.com"),
                port: 22,
            },
            reuse_existing_credentials: true,
            repository: None,
            visibility: RepositoryVisibility::Private,
        }
    }

    fn orchestrator(
        &self,
        plan: BootstrapPlan,
        runner: ScriptedScanRunner,
    ) -> BootstrapOrchestrator<GitRepoDriver, MemoryEnvironment, ScriptedScanRunner> {
        let driver = GitRepoDriver::new(RepoAuth::None).expect("driver");
        self.orchestrator_with(plan, driver, runner)
    }

    fn orchestrator_with<D: RepoDriver>(
        &self,
        plan: BootstrapPlan,
        driver: D,
        runner: ScriptedScanRunner,
    ) -> BootstrapOrchestrator<D, MemoryEnvironment, ScriptedScanRunner> {
        BootstrapOrchestrator::new(
            plan,
            driver,
            self.env.clone(),
            CredentialProvisioner::new(HostScanner::new(runner)),
        )
    }

    async fn run(&self) -> Result<BootstrapOutcome, BootstrapError> {
        self.orchestrator(
            self.plan(),
            ScriptedScanRunner::with_known_hosts(SCANNED_HOST_KEY),
        )
        .execute()
        .await
    }

    fn remote_head(&self) -> String {
        let remote = git2::Repository::open_bare(&self.url).expect("open remote");
        remote
            .refname_to_id(&format!("refs/heads/{BRANCH}"))
            .expect("remote branch")
            .to_string()
    }

    fn remote_commit_count(&self) -> usize {
        let remote = git2::Repository::open_bare(&self.url).expect("open remote");
        let mut walk = remote.revwalk().expect("revwalk");
        walk.push_ref(&format!("refs/heads/{BRANCH}")).expect("push ref");
        walk.count()
    }
}

/// Driver wrapper that advances the remote just before each contended push,
/// standing in for another writer racing the bootstrap.
struct ContendingDriver {
    inner: GitRepoDriver,
    url: String,
    remaining: AtomicU32,
}

impl ContendingDriver {
    fn new(url: &str, contended_pushes: u32) -> Self {
        Self {
            inner: GitRepoDriver::new(RepoAuth::None).expect("driver"),
            url: url.to_owned(),
            remaining: AtomicU32::new(contended_pushes),
        }
    }
}

impl RepoDriver for ContendingDriver {
    fn ensure_open(&mut self, url: &str, branch: &str) -> Result<bool, RepoError> {
        self.inner.ensure_open(url, branch)
    }

    fn write_file(&self, path: &Utf8Path, content: &str) -> Result<(), RepoError> {
        self.inner.write_file(path, content)
    }

    fn commit_if_changed(
        &self,
        author: &CommitAuthor,
        message: &str,
    ) -> Result<CommitOutcome, RepoError> {
        self.inner.commit_if_changed(author, message)
    }

    fn push(&self, branch: &str) -> Result<(), RepoError> {
        let pending = self.remaining.load(Ordering::SeqCst);
        if pending > 0 {
            self.remaining.store(pending - 1, Ordering::SeqCst);
            advance_remote(&self.url, pending);
        }
        self.inner.push(branch)
    }

    fn resync(&self, branch: &str) -> Result<(), RepoError> {
        self.inner.resync(branch)
    }

    fn head_revision(&self) -> Result<String, RepoError> {
        self.inner.head_revision()
    }

    fn is_clean(&self) -> Result<bool, RepoError> {
        self.inner.is_clean()
    }

    fn workdir(&self) -> Result<&Utf8Path, RepoError> {
        self.inner.workdir()
    }
}

/// Commits a marker file directly onto the bare remote's branch.
fn advance_remote(url: &str, marker: u32) {
    let remote = git2::Repository::open_bare(url).expect("open remote");
    let parent = remote
        .refname_to_id(&format!("refs/heads/{BRANCH}"))
        .ok()
        .map(|id| remote.find_commit(id).expect("find commit"));
    let blob = remote
        .blob(format!("write {marker}\n").as_bytes())
        .expect("blob");
    let base = parent.as_ref().map(|commit| commit.tree().expect("tree"));
    let mut builder = remote.treebuilder(base.as_ref()).expect("tree builder");
    builder
        .insert("contender.txt", blob, 0o100_644)
        .expect("insert");
    let tree_id = builder.write().expect("write tree");
    let tree = remote.find_tree(tree_id).expect("find tree");
    let signature =
        git2::Signature::now("contender", "contender@localhost").expect("signature");
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    remote
        .commit(
            Some(&format!("refs/heads/{BRANCH}")),
            &signature,
            &signature,
            "Contending write",
            &tree,
            &parents,
        )
        .expect("contending commit");
}

fn secret_ref() -> ObjectRef {
    ObjectRef::namespaced("Secret", NAMESPACE, NAMESPACE)
}

#[tokio::test]
async fn bootstrap_converges_on_an_empty_remote() {
    let harness = Harness::new();

    let outcome = harness.run().await.expect("bootstrap");

    assert!(outcome.fresh_repository);
    assert!(!outcome.repository_created);
    assert_eq!(outcome.credential_source, CredentialSource::Generated);
    assert_ne!(outcome.install_revision, outcome.sync_revision);
    assert_eq!(harness.remote_head(), outcome.sync_revision);

    for component in ["source-agent", "apply-agent"] {
        assert!(harness.env.contains(&ObjectRef::namespaced(
            "Deployment",
            NAMESPACE,
            component
        )));
    }
    assert!(harness.env.contains(&secret_ref()));
    for kind in ["GitSource", "SyncPipeline"] {
        assert!(
            harness
                .env
                .contains(&ObjectRef::namespaced(kind, NAMESPACE, NAMESPACE))
        );
    }
}

#[tokio::test]
async fn rerunning_a_completed_bootstrap_changes_nothing() {
    let harness = Harness::new();
    let first = harness.run().await.expect("first bootstrap");
    let writes_after_first = harness.env.created_count() + harness.env.updated_count();
    let commits_after_first = harness.remote_commit_count();

    // No scan is scripted: the stored secret must be reused as-is.
    let second = harness
        .orchestrator(harness.plan(), ScriptedScanRunner::new(vec![]))
        .execute()
        .await
        .expect("second bootstrap");

    assert!(!second.fresh_repository);
    assert_eq!(second.credential_source, CredentialSource::Existing);
    assert_eq!(second.install_revision, first.sync_revision);
    assert_eq!(second.sync_revision, first.sync_revision);
    assert_eq!(harness.remote_head(), first.sync_revision);
    assert_eq!(
        harness.remote_commit_count(),
        commits_after_first,
        "an idempotent re-run must not commit or push"
    );
    assert_eq!(
        harness.env.created_count() + harness.env.updated_count(),
        writes_after_first,
        "an idempotent re-run must not write to the environment"
    );
}

#[tokio::test]
async fn contended_push_resynchronises_and_converges() {
    let harness = Harness::new();
    let driver = ContendingDriver::new(&harness.url, 1);

    let outcome = harness
        .orchestrator_with(
            harness.plan(),
            driver,
            ScriptedScanRunner::with_known_hosts(SCANNED_HOST_KEY),
        )
        .execute()
        .await
        .expect("bootstrap should converge after one rejected push");

    assert_eq!(harness.remote_head(), outcome.sync_revision);
    // The other writer's commit survives the retry instead of being
    // force-pushed away.
    let remote = git2::Repository::open_bare(&harness.url).expect("open remote");
    let head = remote
        .refname_to_id(&format!("refs/heads/{BRANCH}"))
        .expect("branch");
    let tree = remote
        .find_commit(head)
        .expect("commit")
        .tree()
        .expect("tree");
    assert!(tree.get_name("contender.txt").is_some());
}

#[tokio::test]
async fn persistent_contention_exhausts_the_push_retries() {
    let harness = Harness::new();
    let driver = ContendingDriver::new(&harness.url, u32::MAX);

    let err = harness
        .orchestrator_with(
            harness.plan(),
            driver,
            ScriptedScanRunner::with_known_hosts(SCANNED_HOST_KEY),
        )
        .execute()
        .await
        .expect_err("every push is rejected");

    assert!(matches!(
        err,
        BootstrapError::PushExhausted {
            step: Step::PushInstall,
            attempts: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn failed_host_scan_is_reported_as_a_provisioning_failure() {
    let harness = Harness::new();

    // No scripted scan response: provisioning the fresh key cannot proceed.
    let err = harness
        .orchestrator(harness.plan(), ScriptedScanRunner::new(vec![]))
        .execute()
        .await
        .expect_err("scan failure should abort the run");

    assert!(matches!(
        err,
        BootstrapError::Credential {
            step: Step::ProvisionCredential,
            ..
        }
    ));
    assert!(!harness.env.contains(&secret_ref()));
}

#[tokio::test]
async fn provider_failures_name_the_repository_creation_step() {
    let harness = Harness::new();
    let provider = RecordingProvider::new();
    provider.fail_with("api unreachable");

    let mut plan = harness.plan();
    plan.repository = Some(RepositoryId::new("ops", "fleet"));
    let err = harness
        .orchestrator(plan, ScriptedScanRunner::with_known_hosts(SCANNED_HOST_KEY))
        .with_provider(provider)
        .execute()
        .await
        .expect_err("provider failure should abort the run");

    assert!(matches!(
        err,
        BootstrapError::Provider {
            step: Step::EnsureRepository,
            ..
        }
    ));
    let remote = git2::Repository::open_bare(&harness.url).expect("open remote");
    assert!(
        remote
            .refname_to_id(&format!("refs/heads/{BRANCH}"))
            .is_err(),
        "repository creation precedes any push"
    );
}

#[tokio::test]
async fn failed_component_halts_the_run_before_sync() {
    let harness = Harness::new();
    harness.env.script_conditions(
        &ObjectRef::namespaced("Deployment", NAMESPACE, "source-agent"),
        vec![moor::environment::Condition::failed("image pull failed")],
    );

    let err = harness.run().await.expect_err("readiness should fail");

    assert!(matches!(
        err,
        BootstrapError::Readiness {
            step: Step::WaitInstall,
            ..
        }
    ));
    assert!(
        !harness
            .env
            .contains(&ObjectRef::namespaced("GitSource", NAMESPACE, NAMESPACE)),
        "sync descriptors must not be applied after a failed install wait"
    );
    assert!(!harness.env.contains(&secret_ref()));
    // The install commit was already published; a re-run picks up from there.
    assert!(!harness.remote_head().is_empty());
}

#[tokio::test]
async fn declined_confirmation_cancels_before_the_secret_is_applied() {
    let harness = Harness::new();

    let err = harness
        .orchestrator(
            harness.plan(),
            ScriptedScanRunner::with_known_hosts(SCANNED_HOST_KEY),
        )
        .with_confirmation(Box::new(|_key| false))
        .execute()
        .await
        .expect_err("declined confirmation should cancel");

    assert!(matches!(err, BootstrapError::ConfirmationDeclined));
    assert!(!harness.env.contains(&secret_ref()));
    assert!(
        !harness
            .env
            .contains(&ObjectRef::namespaced("GitSource", NAMESPACE, NAMESPACE))
    );
}

#[tokio::test]
async fn accepted_confirmation_sees_the_generated_public_key() {
    let harness = Harness::new();
    let shown = std::sync::Arc::new(std::sync::Mutex::new(String::new()));
    let sink = std::sync::Arc::clone(&shown);

    let outcome = harness
        .orchestrator(
            harness.plan(),
            ScriptedScanRunner::with_known_hosts(SCANNED_HOST_KEY),
        )
        .with_confirmation(Box::new(move |key| {
            if let Ok(mut slot) = sink.lock() {
                *slot = key.to_owned();
            }
            true
        }))
        .execute()
        .await
        .expect("bootstrap");

    assert_eq!(outcome.credential_source, CredentialSource::Generated);
    let displayed = shown.lock().expect("lock").clone();
    assert!(displayed.starts_with("ssh-ed25519 "));
}

#[tokio::test]
async fn provider_creates_the_repository_and_registers_the_deploy_key() {
    let harness = Harness::new();
    let provider = RecordingProvider::new();
    let id = RepositoryId::new("ops", "fleet");

    let mut plan = harness.plan();
    plan.repository = Some(id.clone());
    let first = harness
        .orchestrator(plan, ScriptedScanRunner::with_known_hosts(SCANNED_HOST_KEY))
        .with_provider(provider.clone())
        .execute()
        .await
        .expect("first bootstrap");

    assert!(first.repository_created);
    assert!(first.deploy_key_registered);
    assert_eq!(provider.deploy_keys(&id).len(), 1);

    let mut rerun_plan = harness.plan();
    rerun_plan.repository = Some(id.clone());
    let second = harness
        .orchestrator(rerun_plan, ScriptedScanRunner::new(vec![]))
        .with_provider(provider.clone())
        .execute()
        .await
        .expect("second bootstrap");

    assert!(!second.repository_created);
    assert!(!second.deploy_key_registered, "the key is already registered");
    assert_eq!(provider.deploy_keys(&id).len(), 1);
}
