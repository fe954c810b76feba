//! Host identity scanning via the system `ssh-keyscan` binary.
//!
//! Scanning runs once, before any repository traffic, and the captured
//! identities are pinned for every subsequent connection. A scan that yields
//! no identities is an error rather than a silent fallback to trust-on-use.

use std::ffi::OsString;
use std::process::Command;
use std::time::Duration;

use thiserror::Error;

/// Default scan timeout passed to `ssh-keyscan -T`.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ScanError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ScanError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ScanError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Errors surfaced while scanning a host's identity.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScanError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the scanner completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted scan.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the scan succeeds but reports no host identities.
    #[error("host {host}:{port} advertised no identities")]
    NoHostKeys {
        /// Host that was scanned.
        host: String,
        /// Port that was scanned.
        port: u16,
    },
}

/// Scans remote host identities through an injected [`CommandRunner`].
#[derive(Debug)]
pub struct HostScanner<R: CommandRunner> {
    keyscan_bin: String,
    timeout: Duration,
    runner: R,
}

impl HostScanner<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner() -> Self {
        Self::new(ProcessCommandRunner)
    }
}

impl<R: CommandRunner> HostScanner<R> {
    /// Creates a scanner using the provided runner and default settings.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            keyscan_bin: String::from("ssh-keyscan"),
            timeout: DEFAULT_SCAN_TIMEOUT,
            runner,
        }
    }

    /// Overrides the scanner binary.
    #[must_use]
    pub fn with_binary(mut self, keyscan_bin: impl Into<String>) -> Self {
        self.keyscan_bin = keyscan_bin.into();
        self
    }

    /// Overrides the per-scan timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scans `host:port` and returns its identities in `known_hosts` format,
    /// sorted for deterministic output.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Spawn`] when the scanner cannot start,
    /// [`ScanError::CommandFailure`] on a non-zero exit, and
    /// [`ScanError::NoHostKeys`] when the host advertised nothing.
    pub fn scan(&self, host: &str, port: u16) -> Result<String, ScanError> {
        let args = self.build_args(host, port);
        let output = self.runner.run(&self.keyscan_bin, &args)?;
        if !output.is_success() {
            let status_text = output
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string());
            return Err(ScanError::CommandFailure {
                program: self.keyscan_bin.clone(),
                status: output.code,
                status_text,
                stderr: output.stderr,
            });
        }

        let mut lines: Vec<&str> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        if lines.is_empty() {
            return Err(ScanError::NoHostKeys {
                host: host.to_owned(),
                port,
            });
        }
        lines.sort_unstable();

        let mut known_hosts = lines.join("\n");
        known_hosts.push('\n');
        Ok(known_hosts)
    }

    fn build_args(&self, host: &str, port: u16) -> Vec<OsString> {
        vec![
            OsString::from("-p"),
            OsString::from(port.to_string()),
            OsString::from("-T"),
            OsString::from(self.timeout.as_secs().max(1).to_string()),
            OsString::from(host),
        ]
    }
}
