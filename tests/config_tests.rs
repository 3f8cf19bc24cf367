//! Configuration validation and provider selection tests.

#[path = "common/pool_constants.rs"]
mod pool_constants;

use std::sync::Arc;
use std::time::Duration;

use plz_controller::test_support::{FakeContainers, FakePool};
use plz_controller::{
    ConfigError, ControllerConfig, ExecutionSpec, InstanceProvider, PoolRegistry, Progress,
    ProviderError, ProviderKind, SetupError,
};
use rstest::*;
use tokio::time::timeout;

use pool_constants::POOL_NAME;

#[fixture]
fn valid_config() -> ControllerConfig {
    ControllerConfig {
        instance_provider: String::from("aws-autoscaling"),
        autoscaling_group: Some(String::from(POOL_NAME)),
        max_acquire_trials: 3,
        acquire_wait_seconds: 0,
    }
}

#[rstest]
fn valid_config_selects_elastic_pool(valid_config: ControllerConfig) {
    assert_eq!(valid_config.validate(), Ok(ProviderKind::AwsAutoscaling));
}

#[rstest]
fn unknown_provider_is_rejected_with_guidance(valid_config: ControllerConfig) {
    let cfg = ControllerConfig {
        instance_provider: String::from("kubernetes"),
        ..valid_config
    };

    let error = cfg.validate().expect_err("unknown provider");
    let ConfigError::InvalidValue(ref message) = error else {
        panic!("expected InvalidValue error");
    };
    assert!(
        message.contains("PLZ_INSTANCE_PROVIDER"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("plz.toml"),
        "error should mention config file: {message}"
    );
}

#[rstest]
fn zero_trials_are_rejected(valid_config: ControllerConfig) {
    let cfg = ControllerConfig {
        max_acquire_trials: 0,
        ..valid_config
    };
    assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue(_))));
}

#[rstest]
fn localhost_ignores_missing_group(valid_config: ControllerConfig) {
    let cfg = ControllerConfig {
        instance_provider: String::from("localhost"),
        autoscaling_group: None,
        ..valid_config
    };
    assert_eq!(cfg.validate(), Ok(ProviderKind::Localhost));
}

#[rstest]
fn acquire_options_use_configured_bounds(valid_config: ControllerConfig) {
    let options = valid_config.acquire_options();
    assert_eq!(options.max_trials, 3);
    assert_eq!(options.wait_for, Duration::ZERO);
}

#[rstest]
#[tokio::test]
async fn elastic_provider_comes_from_registry(valid_config: ControllerConfig) {
    let pool = FakePool::new(POOL_NAME, 1, 1);
    let registry =
        PoolRegistry::new(pool.backends()).with_acquire_options(valid_config.acquire_options());

    let provider = valid_config
        .connect_provider(Arc::new(FakeContainers::new()), &registry)
        .await
        .expect("provider connects");
    provider
        .acquire_instance("exec-1", &ExecutionSpec::default())
        .complete(|_| {})
        .await
        .expect("acquisition succeeds");

    assert!(registry.contains(POOL_NAME).await);
    assert!(
        provider
            .instance_for("exec-1")
            .await
            .expect("lookup succeeds")
            .is_some()
    );
}

#[rstest]
#[tokio::test]
async fn configured_retry_bounds_override_registry_defaults(valid_config: ControllerConfig) {
    let cfg = ControllerConfig {
        max_acquire_trials: 2,
        acquire_wait_seconds: 0,
        ..valid_config
    };
    let pool = FakePool::new(POOL_NAME, 1, 0);
    let registry = PoolRegistry::new(pool.backends());

    let provider = cfg
        .connect_provider(Arc::new(FakeContainers::new()), &registry)
        .await
        .expect("provider connects");
    let mut tokens = Vec::new();
    let outcome = timeout(
        Duration::from_secs(2),
        provider
            .acquire_instance("exec-1", &ExecutionSpec::default())
            .complete(|progress| tokens.push(progress)),
    )
    .await
    .expect("no ten second wait between trials");

    assert!(
        matches!(outcome, Err(ProviderError::AcquisitionTimeout { ref execution_id }) if execution_id == "exec-1"),
        "unexpected outcome: {outcome:?}"
    );
    assert_eq!(
        tokens,
        vec![Progress::Pending, Progress::Allocated, Progress::Pending]
    );
    assert_eq!(pool.leases.acquire_checks(), 2);
}

#[rstest]
#[tokio::test]
async fn missing_group_fails_setup(valid_config: ControllerConfig) {
    let pool = FakePool::new("other-pool", 1, 0);
    let registry = PoolRegistry::new(pool.backends());

    let Err(err) = valid_config
        .connect_provider(Arc::new(FakeContainers::new()), &registry)
        .await
    else {
        panic!("group does not exist");
    };

    assert!(
        matches!(err, SetupError::Provider(ProviderError::PoolNotFound { ref name }) if name == POOL_NAME),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn localhost_provider_needs_no_pool(valid_config: ControllerConfig) {
    let cfg = ControllerConfig {
        instance_provider: String::from("localhost"),
        ..valid_config
    };
    let pool = FakePool::new("unused", 0, 0);
    let registry = PoolRegistry::new(pool.backends());

    let provider = cfg
        .connect_provider(Arc::new(FakeContainers::new()), &registry)
        .await
        .expect("localhost always connects");
    provider
        .acquire_instance("exec-1", &ExecutionSpec::default())
        .complete(|_| {})
        .await
        .expect("acquisition succeeds");

    assert_eq!(pool.manager.describe_calls(), 0);
}
