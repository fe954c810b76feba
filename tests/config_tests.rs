//! Configuration loading through `MOOR_`-prefixed environment variables.

use std::time::Duration;

use moor::config::{BootstrapConfig, ConfigError, DEFAULT_BRANCH, DEFAULT_INTERVAL_SECS};
use moor::repo::CommitAuthor;
use moor::test_support::EnvGuard;

#[tokio::test]
async fn environment_variables_override_the_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("MOOR_ENVIRONMENT_URL", "http://env.local/api"),
        ("MOOR_BRANCH", "release"),
        ("MOOR_COMPONENTS", "source-agent"),
        ("MOOR_TIMEOUT_SECS", "120"),
    ])
    .await;

    let config = BootstrapConfig::load_without_cli_args().expect("load");
    assert_eq!(config.environment_url, "http://env.local/api");
    assert_eq!(config.branch, "release");
    assert_eq!(config.component_list(), vec![String::from("source-agent")]);
    assert_eq!(config.timeout(), Duration::from_secs(120));
    config.validate().expect("overridden configuration is valid");
}

#[tokio::test]
async fn unset_fields_fall_back_to_defaults() {
    let _guard = EnvGuard::set_var("MOOR_ENVIRONMENT_URL", "http://env.local/api").await;

    let config = BootstrapConfig::load_without_cli_args().expect("load");
    assert_eq!(config.branch, DEFAULT_BRANCH);
    assert_eq!(config.namespace, "moor-system");
    assert_eq!(config.interval(), Duration::from_secs(DEFAULT_INTERVAL_SECS));
    assert_eq!(config.author(), CommitAuthor::default());
    assert_eq!(
        config.component_list(),
        vec![String::from("source-agent"), String::from("apply-agent")]
    );
}

#[tokio::test]
async fn missing_environment_url_is_reported_with_its_flag() {
    let _guard = EnvGuard::set_var("MOOR_ENVIRONMENT_URL", "").await;

    let config = BootstrapConfig::load_without_cli_args().expect("load");
    let err = config.validate().expect_err("blank url should fail");
    assert!(matches!(err, ConfigError::Missing { .. }));
    let rendered = err.to_string();
    assert!(rendered.contains("MOOR_ENVIRONMENT_URL"));
    assert!(rendered.contains("--environment-url"));
}

#[tokio::test]
async fn unusable_durations_are_rejected() {
    let _guard = EnvGuard::set_vars(&[
        ("MOOR_ENVIRONMENT_URL", "http://env.local/api"),
        ("MOOR_TIMEOUT_SECS", "1"),
        ("MOOR_POLL_INTERVAL_SECS", "10"),
    ])
    .await;

    let config = BootstrapConfig::load_without_cli_args().expect("load");
    let err = config.validate().expect_err("deadline below probe should fail");
    assert!(matches!(err, ConfigError::Invalid { .. }));
}
