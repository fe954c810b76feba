//! Git-backed repository driver.
//!
//! The working copy lives in a temporary directory owned by the driver and
//! is discarded when the driver drops. Remote transport authenticates with
//! the material in [`RepoAuth`]; when pinned host identities are supplied,
//! connections to unlisted hosts are refused rather than trusted on use.

use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use git2::build::RepoBuilder;
use git2::cert::Cert;
use git2::{
    CertificateCheckStatus, Commit, ErrorClass, ErrorCode, FetchOptions, PushOptions,
    RemoteCallbacks, Repository, Status, StatusOptions,
};
use tempfile::TempDir;

use super::{CommitAuthor, CommitOutcome, RepoAuth, RepoDriver, RepoError};

/// Slot written by the certificate callback when it refuses a host, so the
/// failure can be reported as an identity mismatch rather than a generic
/// transport error.
type RejectedHost = Arc<Mutex<Option<String>>>;

/// Repository driver backed by libgit2.
pub struct GitRepoDriver {
    auth: RepoAuth,
    // Owns the working copy; dropped with the driver.
    _workspace: TempDir,
    workdir: Utf8PathBuf,
    repo: Option<Repository>,
    branch: String,
}

// `git2::Repository` has no `Debug` impl, and the auth field holds secret
// material that must not leak into log output.
impl std::fmt::Debug for GitRepoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepoDriver")
            .field("workdir", &self.workdir)
            .field("branch", &self.branch)
            .field("open", &self.repo.is_some())
            .finish_non_exhaustive()
    }
}

impl GitRepoDriver {
    /// Creates a driver with a fresh temporary working directory.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Workspace`] when the directory cannot be
    /// created or its path is not valid UTF-8.
    pub fn new(auth: RepoAuth) -> Result<Self, RepoError> {
        let workspace = tempfile::tempdir().map_err(|err| RepoError::Workspace {
            message: err.to_string(),
        })?;
        let workdir = Utf8PathBuf::from_path_buf(workspace.path().to_path_buf()).map_err(
            |path| RepoError::Workspace {
                message: format!("working directory path is not UTF-8: {}", path.display()),
            },
        )?;
        Ok(Self {
            auth,
            _workspace: workspace,
            workdir,
            repo: None,
            branch: String::new(),
        })
    }

    fn repo(&self) -> Result<&Repository, RepoError> {
        self.repo.as_ref().ok_or(RepoError::NotOpen)
    }

    fn callbacks(&self) -> (RemoteCallbacks<'static>, RejectedHost) {
        let rejected: RejectedHost = Arc::new(Mutex::new(None));
        let mut callbacks = RemoteCallbacks::new();

        let auth = self.auth.clone();
        callbacks.credentials(move |_url, username_from_url, allowed| match &auth {
            RepoAuth::None => {
                if allowed.contains(git2::CredentialType::SSH_KEY) {
                    git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
                } else {
                    git2::Cred::default()
                }
            }
            RepoAuth::Basic { username, password } => {
                git2::Cred::userpass_plaintext(username, password)
            }
            RepoAuth::Key {
                private_key_pem,
                passphrase,
                username,
                ..
            } => git2::Cred::ssh_key_from_memory(
                username_from_url.unwrap_or(username),
                None,
                private_key_pem,
                passphrase.as_deref(),
            ),
        });

        let pinned = match &self.auth {
            RepoAuth::Key { known_hosts, .. } => known_hosts.clone(),
            RepoAuth::None | RepoAuth::Basic { .. } => None,
        };
        let slot = Arc::clone(&rejected);
        callbacks.certificate_check(move |cert, host| {
            let Some(entries) = &pinned else {
                return Ok(CertificateCheckStatus::CertificatePassthrough);
            };
            if hostkey_is_pinned(cert, host, entries) {
                Ok(CertificateCheckStatus::CertificateOk)
            } else {
                if let Ok(mut refused) = slot.lock() {
                    *refused = Some(host.to_owned());
                }
                Err(git2::Error::new(
                    ErrorCode::Certificate,
                    ErrorClass::Callback,
                    "host identity is not in the pinned known_hosts entries",
                ))
            }
        });

        (callbacks, rejected)
    }

    fn fetch_options(&self) -> (FetchOptions<'static>, RejectedHost) {
        let (callbacks, rejected) = self.callbacks();
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        (options, rejected)
    }
}

impl RepoDriver for GitRepoDriver {
    fn ensure_open(&mut self, url: &str, branch: &str) -> Result<bool, RepoError> {
        self.branch = branch.to_owned();
        let (fetch_options, rejected) = self.fetch_options();
        let mut builder = RepoBuilder::new();
        builder.branch(branch).fetch_options(fetch_options);

        match builder.clone(url, self.workdir.as_std_path()) {
            Ok(repo) => {
                self.repo = Some(repo);
                Ok(false)
            }
            Err(err) if is_missing_branch(&err) => {
                // Empty remote or absent branch: start a fresh history that
                // the first push will publish.
                reset_workdir(&self.workdir)?;
                let repo = Repository::init(self.workdir.as_std_path())?;
                repo.remote("origin", url)?;
                repo.set_head(&format!("refs/heads/{branch}"))?;
                self.repo = Some(repo);
                Ok(true)
            }
            Err(err) => Err(classify(err, &rejected)),
        }
    }

    fn write_file(&self, path: &Utf8Path, content: &str) -> Result<(), RepoError> {
        self.repo()?;
        let target = self.workdir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| RepoError::Write {
                path: parent.to_owned(),
                message: err.to_string(),
            })?;
        }
        std::fs::write(&target, content).map_err(|err| RepoError::Write {
            path: target.clone(),
            message: err.to_string(),
        })
    }

    fn commit_if_changed(
        &self,
        author: &CommitAuthor,
        message: &str,
    ) -> Result<CommitOutcome, RepoError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;

        for entry in repo.statuses(Some(&mut status_options()))?.iter() {
            let Some(path) = entry.path() else { continue };
            let status = entry.status();
            if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
                index.remove_path(Path::new(path))?;
                continue;
            }
            // Symlinks whose target is gone cannot round-trip through a
            // checkout; leave them out of the recorded tree.
            if is_broken_symlink(&self.workdir.join(path))? {
                continue;
            }
            index.add_path(Path::new(path))?;
        }

        index.write()?;
        let tree_id = index.write_tree()?;
        let head = head_commit(repo)?;

        if let Some(current) = &head {
            if current.tree_id() == tree_id {
                return Ok(CommitOutcome::Unchanged {
                    revision: current.id().to_string(),
                });
            }
        } else if repo.find_tree(tree_id)?.is_empty() {
            return Err(RepoError::EmptyRepository {
                branch: self.branch.clone(),
            });
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = git2::Signature::now(&author.name, &author.email)?;
        let parents: Vec<&Commit<'_>> = head.iter().collect();
        let revision = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?
            .to_string();
        Ok(CommitOutcome::Committed { revision })
    }

    fn push(&self, branch: &str) -> Result<(), RepoError> {
        let repo = self.repo()?;
        let mut remote = repo.find_remote("origin")?;

        let (mut callbacks, rejected) = self.callbacks();
        let rejections: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rejections);
        callbacks.push_update_reference(move |_refname, status| {
            if let Some(message) = status {
                if let Ok(mut queue) = sink.lock() {
                    queue.push(message.to_owned());
                }
            }
            Ok(())
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

        match remote.push(&[refspec.as_str()], Some(&mut options)) {
            Ok(()) => {}
            Err(err) if err.code() == ErrorCode::NotFastForward => {
                return Err(RepoError::NonFastForward {
                    reference: format!("refs/heads/{branch}"),
                    message: err.message().to_owned(),
                });
            }
            Err(err) => return Err(classify(err, &rejected)),
        }

        let captured = rejections
            .lock()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |list| list.clone());
        if let Some(message) = captured.into_iter().next() {
            return Err(RepoError::NonFastForward {
                reference: format!("refs/heads/{branch}"),
                message,
            });
        }
        Ok(())
    }

    fn resync(&self, branch: &str) -> Result<(), RepoError> {
        let repo = self.repo()?;
        let mut remote = repo.find_remote("origin")?;

        let (mut options, rejected) = self.fetch_options();
        if let Err(err) = remote.fetch(&[branch], Some(&mut options), None) {
            if err.code() == ErrorCode::NotFound {
                return Ok(());
            }
            return Err(classify(err, &rejected));
        }

        let tracking = format!("refs/remotes/origin/{branch}");
        let reference = match repo.find_reference(&tracking) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(()),
            Err(err) => return Err(RepoError::Git(err)),
        };
        let commit = reference.peel_to_commit()?;

        repo.set_head(&format!("refs/heads/{branch}"))?;
        repo.reset(commit.as_object(), git2::ResetType::Hard, None)?;
        Ok(())
    }

    fn head_revision(&self) -> Result<String, RepoError> {
        let repo = self.repo()?;
        head_commit(repo)?
            .map(|commit| commit.id().to_string())
            .ok_or_else(|| RepoError::EmptyRepository {
                branch: self.branch.clone(),
            })
    }

    fn is_clean(&self) -> Result<bool, RepoError> {
        let repo = self.repo()?;
        for entry in repo.statuses(Some(&mut status_options()))?.iter() {
            let Some(path) = entry.path() else { continue };
            // A deleted tracked file has no path on disk, so it must be
            // recognised before the symlink probe skips it.
            if entry
                .status()
                .intersects(Status::WT_DELETED | Status::INDEX_DELETED)
            {
                return Ok(false);
            }
            if is_broken_symlink(&self.workdir.join(path))? {
                continue;
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn workdir(&self) -> Result<&Utf8Path, RepoError> {
        self.repo()?;
        Ok(&self.workdir)
    }
}

fn status_options() -> StatusOptions {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    options
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, git2::Error> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(err)
            if err.code() == ErrorCode::UnbornBranch || err.code() == ErrorCode::NotFound =>
        {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Clone failures that mean "nothing to clone yet": an empty remote or a
/// remote that lacks the requested branch.
fn is_missing_branch(err: &git2::Error) -> bool {
    err.code() == ErrorCode::NotFound
        || err
            .message()
            .contains("remote HEAD refers to nonexistent ref")
}

fn reset_workdir(workdir: &Utf8Path) -> Result<(), RepoError> {
    let write_error = |err: std::io::Error| RepoError::Write {
        path: workdir.to_owned(),
        message: err.to_string(),
    };
    if workdir.as_std_path().exists() {
        std::fs::remove_dir_all(workdir).map_err(write_error)?;
    }
    std::fs::create_dir_all(workdir).map_err(write_error)
}

fn is_broken_symlink(path: &Utf8Path) -> Result<bool, RepoError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        // Already gone; nothing to stage either way.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => {
            return Err(RepoError::Inspect {
                path: path.to_owned(),
                message: err.to_string(),
            });
        }
    };
    if !metadata.file_type().is_symlink() {
        return Ok(false);
    }
    match std::fs::metadata(path) {
        Ok(_) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(RepoError::Inspect {
            path: path.to_owned(),
            message: err.to_string(),
        }),
    }
}

fn classify(err: git2::Error, rejected: &RejectedHost) -> RepoError {
    rejected
        .lock()
        .map_or_else(|poisoned| poisoned.into_inner().take(), |mut slot| slot.take())
        .map_or(RepoError::Git(err), |host| {
            RepoError::HostIdentityMismatch { host }
        })
}

/// Checks a presented host key against pinned `known_hosts` entries.
fn hostkey_is_pinned(cert: &Cert<'_>, host: &str, pinned: &str) -> bool {
    let Some(presented) = cert.as_hostkey().and_then(git2::cert::CertHostkey::hostkey)
    else {
        // Not an SSH transport; nothing to pin against.
        return true;
    };

    pinned
        .lines()
        .filter_map(parse_known_hosts_line)
        .filter(|(hosts, _)| host_matches(hosts, host))
        .any(|(_, key)| key == presented)
}

fn parse_known_hosts_line(line: &str) -> Option<(String, Vec<u8>)> {
    let mut fields = line.split_whitespace();
    let hosts = fields.next()?;
    let _key_type = fields.next()?;
    let encoded = fields.next()?;
    let key = STANDARD.decode(encoded).ok()?;
    Some((hosts.to_owned(), key))
}

fn host_matches(hosts: &str, host: &str) -> bool {
    hosts.split(',').any(|candidate| {
        let name = candidate
            .strip_prefix('[')
            .and_then(|rest| rest.split_once("]:"))
            .map_or(candidate, |(bracketed, _port)| bracketed);
        name == host
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hosts_match_handles_bracketed_ports() {
        assert!(host_matches("[git.example.com]:2222", "git.example.com"));
        assert!(host_matches("a.example.com,git.example.com", "git.example.com"));
        assert!(!host_matches("other.example.com", "git.example.com"));
    }

    #[test]
    fn debug_output_omits_credential_material() {
        let driver = GitRepoDriver::new(RepoAuth::Basic {
            username: String::from("deploy"),
            password: String::from("hunter2"),
        })
        .expect("driver");
        let rendered = format!("{driver:?}");
        assert!(rendered.contains("GitRepoDriver"));
        assert!(rendered.contains("open: false"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn known_hosts_lines_parse_keys() {
        let (hosts, key) =
            parse_known_hosts_line("git.example.com ssh-ed25519 AAAA").expect("line parses");
        assert_eq!(hosts, "git.example.com");
        assert_eq!(key, vec![0, 0, 0]);
    }
}
