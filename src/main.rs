//! Binary entry point for the moor CLI.

use std::io::{self, BufRead, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use moor::{
    Applier, ApplyError, BootstrapConfig, BootstrapError, BootstrapOrchestrator, BootstrapOutcome,
    BootstrapPlan, ConfirmFn, CredentialProvisioner, CredentialRequest, GitRepoDriver,
    HostedForge, InstallOptions, ManifestError, ObjectRef, PollError, ReadinessTarget, RepoAuth,
    RepoError, RepositoryId, RepositoryVisibility, RestEnvironmentClient, poll_ready,
    remote_host,
};

mod cli;

use cli::{BootstrapCommand, Cli, InstallCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("repository error: {0}")]
    Repository(#[from] RepoError),
    #[error("failed to render manifests: {0}")]
    Manifest(#[from] ManifestError),
    #[error("failed to apply manifests: {0}")]
    Apply(#[from] ApplyError),
    #[error("components did not become ready: {0}")]
    Readiness(#[from] PollError),
    #[error("install failed: {0}")]
    Install(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Bootstrap(command) => bootstrap_command(command).await,
        Cli::Install(command) => install_command(command).await,
    }
}

async fn bootstrap_command(args: BootstrapCommand) -> Result<i32, CliError> {
    let mut config =
        BootstrapConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    apply_bootstrap_overrides(&mut config, &args);
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let credential = credential_request(&args)?;
    let auth = repo_auth(&args);
    let repository = args
        .repository
        .as_deref()
        .map(str::parse::<RepositoryId>)
        .transpose()
        .map_err(CliError::Config)?;

    let plan = BootstrapPlan {
        url: args.url.clone(),
        branch: config.branch.clone(),
        namespace: config.namespace.clone(),
        target_path: args.path.clone().unwrap_or_default(),
        components: config.component_list(),
        registry: config.registry.clone(),
        image_tag: config.image_tag.clone(),
        watch_all_namespaces: true,
        author: config.author(),
        interval: config.interval(),
        poll_interval: config.poll_interval(),
        timeout: config.timeout(),
        credential,
        reuse_existing_credentials: !args.rotate_credentials,
        repository,
        visibility: if args.public {
            RepositoryVisibility::Public
        } else {
            RepositoryVisibility::Private
        },
    };

    let driver = GitRepoDriver::new(auth)?;
    let client = RestEnvironmentClient::new(
        config.environment_url.clone(),
        config.environment_token.clone(),
    );
    let provisioner = CredentialProvisioner::with_process_runner();
    let orchestrator = BootstrapOrchestrator::new(plan, driver, client, provisioner)
        .with_confirmation(confirm_callback(args.confirm));

    let forge = match (&config.provider_api, &config.provider_token) {
        (Some(api), Some(token)) => Some(HostedForge::new(api.clone(), token.clone())),
        _ => None,
    };
    let outcome = match forge {
        Some(forge) => orchestrator.with_provider(forge).execute().await?,
        None => orchestrator.execute().await?,
    };

    report_outcome(&outcome);
    Ok(0)
}

async fn install_command(args: InstallCommand) -> Result<i32, CliError> {
    let mut config =
        BootstrapConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    apply_install_overrides(&mut config, &args);

    let options = InstallOptions {
        namespace: config.namespace.clone(),
        components: config.component_list(),
        registry: config.registry.clone(),
        image_tag: config.image_tag.clone(),
        watch_all_namespaces: true,
        target_path: args.path.clone().unwrap_or_default(),
    };
    let set = moor::manifests::install::render(&options);

    if args.export {
        let mut stdout = io::stdout();
        for file in set.files() {
            writeln!(stdout, "# {}", file.path).ok();
            stdout.write_all(file.content.as_bytes()).ok();
        }
        return Ok(0);
    }

    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let staging = tempfile::tempdir().map_err(|err| CliError::Install(err.to_string()))?;
    let root = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
        .map_err(|path| CliError::Install(format!("non UTF-8 path: {}", path.display())))?;
    set.write_to(&root)?;

    let client = RestEnvironmentClient::new(
        config.environment_url.clone(),
        config.environment_token.clone(),
    );
    let applier = Applier::new(&client);
    applier
        .apply(&root.join(moor::manifests::install::render_root(&options)))
        .await?;

    let targets: Vec<ReadinessTarget> = options
        .components
        .iter()
        .map(|component| {
            ReadinessTarget::ready(ObjectRef::namespaced(
                "Deployment",
                &options.namespace,
                component,
            ))
        })
        .collect();
    poll_ready(&client, &targets, config.poll_interval(), config.timeout()).await?;

    writeln!(io::stdout(), "components installed and ready").ok();
    Ok(0)
}

fn apply_bootstrap_overrides(config: &mut BootstrapConfig, args: &BootstrapCommand) {
    if let Some(url) = &args.environment_url {
        config.environment_url = url.clone();
    }
    if let Some(token) = &args.environment_token {
        config.environment_token = Some(token.clone());
    }
    if let Some(branch) = &args.branch {
        config.branch = branch.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(components) = &args.components {
        config.components = components.clone();
    }
    if let Some(interval) = args.interval {
        config.interval_secs = interval;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
}

fn apply_install_overrides(config: &mut BootstrapConfig, args: &InstallCommand) {
    if let Some(url) = &args.environment_url {
        config.environment_url = url.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(components) = &args.components {
        config.components = components.clone();
    }
    if let Some(registry) = &args.registry {
        config.registry = registry.clone();
    }
    if let Some(image_tag) = &args.image_tag {
        config.image_tag = image_tag.clone();
    }
}

/// Chooses the credential shape from the CLI flags. Basic and TLS material
/// are mutually exclusive at parse time; with neither given, an SSH key is
/// generated for SSH URLs.
fn credential_request(args: &BootstrapCommand) -> Result<CredentialRequest, CliError> {
    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        return Ok(CredentialRequest::Basic {
            username: username.clone(),
            password: password.clone(),
        });
    }
    if let (Some(cert), Some(key)) = (&args.tls_cert, &args.tls_key) {
        return Ok(CredentialRequest::Tls {
            cert_path: Utf8PathBuf::from(cert),
            key_path: Utf8PathBuf::from(key),
            ca_path: args.tls_ca.as_deref().map(Utf8PathBuf::from),
        });
    }

    let algorithm = args
        .key_algorithm
        .parse()
        .map_err(CliError::Config)?;
    let Some((host, port)) = remote_host(&args.url) else {
        return Err(CliError::Config(String::from(
            "http(s) repository urls need --username/--password or --tls-cert/--tls-key",
        )));
    };
    Ok(CredentialRequest::SshKey {
        algorithm,
        host,
        port,
    })
}

/// Derives the transport auth for git operations. Basic credentials are
/// reused for pushing; SSH URLs fall back to the local agent.
fn repo_auth(args: &BootstrapCommand) -> RepoAuth {
    match (&args.username, &args.password) {
        (Some(username), Some(password)) => RepoAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        },
        _ => RepoAuth::None,
    }
}

/// Prints the generated public key; with `interactive` set, waits for the
/// operator to confirm it has been granted read access.
fn confirm_callback(interactive: bool) -> ConfirmFn {
    Box::new(move |public_key: &str| {
        let mut stdout = io::stdout();
        writeln!(stdout, "generated deploy key:\n{public_key}").ok();
        if !interactive {
            return true;
        }
        writeln!(
            stdout,
            "grant this key read access to the repository, then confirm [y/N]:"
        )
        .ok();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    })
}

fn report_outcome(outcome: &BootstrapOutcome) {
    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "bootstrap complete: install revision {}, sync revision {}",
        outcome.install_revision, outcome.sync_revision
    )
    .ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bootstrap_args(url: &str) -> BootstrapCommand {
        BootstrapCommand {
            url: String::from(url),
            branch: None,
            environment_url: None,
            environment_token: None,
            namespace: None,
            path: None,
            components: None,
            username: None,
            password: None,
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
            key_algorithm: String::from("ed25519"),
            rotate_credentials: false,
            confirm: false,
            repository: None,
            public: false,
            interval: None,
            timeout: None,
        }
    }

    fn sample_config() -> BootstrapConfig {
        BootstrapConfig {
            environment_url: String::from("http://env.local/api"),
            environment_token: None,
            branch: String::from("main"),
            namespace: String::from("moor-system"),
            components: String::from("source-agent"),
            registry: String::from("ghcr.io/moor-cd"),
            image_tag: String::from("latest"),
            author_name: String::from("moor"),
            author_email: String::from("moor@localhost"),
            interval_secs: 60,
            poll_interval_secs: 5,
            timeout_secs: 300,
            provider_api: None,
            provider_token: None,
        }
    }

    #[test]
    fn ssh_urls_default_to_generated_keys() {
        let args = bootstrap_args("ssh://git@git.example.com/ops/fleet.git");
        let request =
            credential_request(&args).expect("request should build");
        assert!(matches!(
            request,
            CredentialRequest::SshKey { host, port, .. }
                if host == "git.example.com" && port == 22
        ));
    }

    #[test]
    fn http_urls_require_explicit_credentials() {
        let args = bootstrap_args("https://git.example.com/ops/fleet.git");
        let err = credential_request(&args)
            .expect_err("https without credentials should fail");
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn basic_flags_win_over_url_shape() {
        let mut args = bootstrap_args("https://git.example.com/ops/fleet.git");
        args.username = Some(String::from("deploy"));
        args.password = Some(String::from("hunter2"));
        let request =
            credential_request(&args).expect("request should build");
        assert!(matches!(request, CredentialRequest::Basic { .. }));
        assert!(matches!(repo_auth(&args), RepoAuth::Basic { .. }));
    }

    #[test]
    fn overrides_replace_config_fields() {
        let mut config = sample_config();
        let mut args = bootstrap_args("ssh://git@git.example.com/ops/fleet.git");
        args.branch = Some(String::from("release"));
        args.interval = Some(120);
        apply_bootstrap_overrides(&mut config, &args);
        assert_eq!(config.branch, "release");
        assert_eq!(config.interval_secs, 120);
    }

    #[test]
    fn write_error_renders_message() {
        let mut buf = Vec::new();
        let err = CliError::Config(String::from("missing environment_url"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("configuration error"));
    }
}
