//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::credentials::scan::{CommandOutput, CommandRunner, ScanError};
use crate::environment::{
    ClientFuture, Condition, EnvObject, EnvironmentClient, EnvironmentError, ObjectRef,
    condition_from_manifest,
};
use crate::provider::{
    Provider, ProviderError, ProviderFuture, RepositoryId, RepositoryVisibility,
};

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, EnvObject>,
    conditions: BTreeMap<String, VecDeque<Condition>>,
    created: usize,
    updated: usize,
}

/// In-memory environment used to drive deterministic bootstrap runs.
///
/// Objects are stored by their reference. Condition reads consume scripted
/// sequences when present; otherwise an object that exists reports a
/// satisfied `Ready` condition (or whatever its own manifest declares) and
/// a missing object reports not-found.
#[derive(Clone, Debug, Default)]
pub struct MemoryEnvironment {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEnvironment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues condition responses for one object, consumed in order.
    pub fn script_conditions(&self, reference: &ObjectRef, conditions: Vec<Condition>) {
        let mut state = lock_or_recover(&self.state);
        state
            .conditions
            .insert(reference.to_string(), conditions.into());
    }

    /// Returns `true` when the object is currently stored.
    #[must_use]
    pub fn contains(&self, reference: &ObjectRef) -> bool {
        lock_or_recover(&self.state)
            .objects
            .contains_key(&reference.to_string())
    }

    /// Returns a stored object's manifest, when present.
    #[must_use]
    pub fn manifest_of(&self, reference: &ObjectRef) -> Option<serde_json::Value> {
        lock_or_recover(&self.state)
            .objects
            .get(&reference.to_string())
            .map(|object| object.manifest.clone())
    }

    /// Number of create operations performed so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        lock_or_recover(&self.state).created
    }

    /// Number of update operations performed so far.
    #[must_use]
    pub fn updated_count(&self) -> usize {
        lock_or_recover(&self.state).updated
    }
}

impl EnvironmentClient for MemoryEnvironment {
    fn get<'a>(&'a self, reference: &'a ObjectRef) -> ClientFuture<'a, EnvObject> {
        Box::pin(async move {
            lock_or_recover(&self.state)
                .objects
                .get(&reference.to_string())
                .cloned()
                .ok_or_else(|| EnvironmentError::NotFound {
                    reference: reference.clone(),
                })
        })
    }

    fn create<'a>(&'a self, object: &'a EnvObject) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock_or_recover(&self.state);
            let key = object.reference.to_string();
            if state.objects.contains_key(&key) {
                return Err(EnvironmentError::Conflict {
                    reference: object.reference.clone(),
                    message: String::from("object already exists"),
                });
            }
            state.objects.insert(key, object.clone());
            state.created += 1;
            Ok(())
        })
    }

    fn update<'a>(&'a self, object: &'a EnvObject) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock_or_recover(&self.state);
            let key = object.reference.to_string();
            if !state.objects.contains_key(&key) {
                return Err(EnvironmentError::NotFound {
                    reference: object.reference.clone(),
                });
            }
            state.objects.insert(key, object.clone());
            state.updated += 1;
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        kind: &'a str,
        namespace: Option<&'a str>,
    ) -> ClientFuture<'a, Vec<EnvObject>> {
        Box::pin(async move {
            let state = lock_or_recover(&self.state);
            Ok(state
                .objects
                .values()
                .filter(|object| object.reference.kind == kind)
                .filter(|object| {
                    namespace.is_none() || object.reference.namespace.as_deref() == namespace
                })
                .cloned()
                .collect())
        })
    }

    fn read_condition<'a>(
        &'a self,
        reference: &'a ObjectRef,
        condition: &'a str,
    ) -> ClientFuture<'a, Condition> {
        Box::pin(async move {
            let mut state = lock_or_recover(&self.state);
            let key = reference.to_string();
            if let Some(queue) = state.conditions.get_mut(&key) {
                if let Some(scripted) = queue.pop_front() {
                    return Ok(scripted);
                }
            }

            let Some(object) = state.objects.get(&key) else {
                return Err(EnvironmentError::NotFound {
                    reference: reference.clone(),
                });
            };
            let observed = condition_from_manifest(&object.manifest, condition);
            if object.manifest.get("status").is_some() {
                Ok(observed)
            } else {
                // Objects without a status block count as ready so
                // unscripted runs converge.
                Ok(Condition::ready())
            }
        })
    }
}

/// Records a single invocation made through [`ScriptedScanRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

#[derive(Debug, Default)]
struct ScanScript {
    responses: VecDeque<Result<CommandOutput, ScanError>>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic host scans without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedScanRunner {
    script: Arc<Mutex<ScanScript>>,
}

impl ScriptedScanRunner {
    /// Creates a runner seeded with the given responses.
    #[must_use]
    pub fn new(responses: Vec<Result<CommandOutput, ScanError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(ScanScript {
                responses: responses.into(),
                invocations: Vec::new(),
            })),
        }
    }

    /// Creates a runner that reports the given `known_hosts` lines once.
    #[must_use]
    pub fn with_known_hosts(known_hosts: &str) -> Self {
        Self::new(vec![Ok(CommandOutput {
            code: Some(0),
            stdout: known_hosts.to_owned(),
            stderr: String::new(),
        })])
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock_or_recover(&self.script).invocations.clone()
    }
}

impl CommandRunner for ScriptedScanRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ScanError> {
        let mut script = lock_or_recover(&self.script);
        script.invocations.push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        script
            .responses
            .pop_front()
            .unwrap_or_else(|| {
                Err(ScanError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                })
            })
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    repositories: BTreeSet<String>,
    deploy_keys: BTreeMap<String, Vec<String>>,
    fail_message: Option<String>,
}

/// In-memory provider recording repository and deploy-key registrations.
#[derive(Clone, Debug, Default)]
pub struct RecordingProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl RecordingProvider {
    /// Creates a provider with no repositories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds an existing repository.
    pub fn seed_repository(&self, id: &RepositoryId) {
        lock_or_recover(&self.state)
            .repositories
            .insert(id.to_string());
    }

    /// Makes the next provider operation fail with a transport error.
    pub fn fail_with(&self, message: &str) {
        lock_or_recover(&self.state).fail_message = Some(message.to_owned());
    }

    /// Returns the deploy keys registered for a repository.
    #[must_use]
    pub fn deploy_keys(&self, id: &RepositoryId) -> Vec<String> {
        lock_or_recover(&self.state)
            .deploy_keys
            .get(&id.to_string())
            .cloned()
            .unwrap_or_default()
    }
}

impl Provider for RecordingProvider {
    fn ensure_repository_exists<'a>(
        &'a self,
        id: &'a RepositoryId,
        _visibility: RepositoryVisibility,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let mut state = lock_or_recover(&self.state);
            if let Some(message) = state.fail_message.take() {
                return Err(ProviderError::Transport { message });
            }
            Ok(state.repositories.insert(id.to_string()))
        })
    }

    fn register_deploy_key<'a>(
        &'a self,
        id: &'a RepositoryId,
        _title: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let mut state = lock_or_recover(&self.state);
            if let Some(message) = state.fail_message.take() {
                return Err(ProviderError::Transport { message });
            }
            let keys = state.deploy_keys.entry(id.to_string()).or_default();
            if keys.iter().any(|key| key == public_key) {
                return Ok(false);
            }
            keys.push(public_key.to_owned());
            Ok(true)
        })
    }
}

/// Global mutex used to serialise environment-variable mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets a single environment variable while holding a global mutex.
    pub async fn set_var(key: &str, value: &str) -> Self {
        Self::set_vars(&[(key, value)]).await
    }

    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
