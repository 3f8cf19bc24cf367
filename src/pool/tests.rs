//! Unit tests for the elastic pool provider.

use std::time::Duration;

use rstest::{fixture, rstest};
use tokio::time::timeout;

use super::*;
use crate::provider::Progress;
use crate::test_support::FakePool;

const POOL: &str = "plz-workers";

const fn quick(max_trials: u32) -> AcquireOptions {
    AcquireOptions {
        max_trials,
        wait_for: Duration::ZERO,
    }
}

async fn provider_for(pool: &FakePool, options: AcquireOptions) -> ElasticPoolProvider {
    ElasticPoolProvider::connect(POOL, &pool.backends(), options)
        .await
        .expect("pool exists")
}

async fn drain(acquisition: &mut Acquisition<'_>) -> Result<Vec<Progress>, ProviderError> {
    let mut tokens = Vec::new();
    while let Some(progress) = acquisition.next_event().await? {
        tokens.push(progress);
    }
    Ok(tokens)
}

#[fixture]
fn empty_pool() -> FakePool {
    FakePool::new(POOL, 3, 0)
}

#[tokio::test]
async fn connect_rejects_unknown_pool() {
    let pool = FakePool::new("other", 1, 0);
    let err = ElasticPoolProvider::connect(POOL, &pool.backends(), quick(1))
        .await
        .expect_err("unknown pool must fail");
    assert!(
        matches!(err, ProviderError::PoolNotFound { ref name } if name == POOL),
        "unexpected error: {err}"
    );
    assert!(pool.requested_filters().is_empty());
}

#[tokio::test]
async fn connect_builds_leases_for_pool_tag() {
    let pool = FakePool::new(POOL, 1, 0);
    provider_for(&pool, quick(1)).await;
    assert_eq!(pool.requested_filters(), vec![InstanceFilter::for_pool(POOL)]);
}

#[tokio::test]
async fn available_instance_is_started_without_scaling() {
    let pool = FakePool::new(POOL, 1, 1);
    let provider = provider_for(&pool, quick(3)).await;

    let mut acquisition = provider.acquire_instance_with("exec-1", provider.options());
    let tokens = drain(&mut acquisition).await.expect("acquisition succeeds");

    assert_eq!(tokens, vec![Progress::Started]);
    assert!(acquisition.is_acquired());
    assert!(pool.manager.capacity_requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn exhausted_acquisition_bumps_capacity_once(empty_pool: FakePool) {
    let provider = provider_for(&empty_pool, quick(5)).await;

    let mut acquisition = provider.acquire_instance_with("exec-1", provider.options());
    let tokens = drain(&mut acquisition).await.expect("no fatal error");

    assert_eq!(empty_pool.manager.capacity_requests(), vec![4]);
    assert_eq!(empty_pool.leases.acquire_checks(), 5);
    assert_eq!(
        tokens.iter().filter(|token| **token == Progress::Pending).count(),
        5
    );
    assert_eq!(
        tokens
            .iter()
            .filter(|token| **token == Progress::Allocated)
            .count(),
        1
    );
    assert!(!tokens.contains(&Progress::Started));
    assert!(!acquisition.is_acquired());
}

#[rstest]
#[tokio::test]
async fn exhaustion_completes_as_timeout(empty_pool: FakePool) {
    let provider = provider_for(&empty_pool, quick(2)).await;

    let err = provider
        .acquire_instance_with("exec-9", provider.options())
        .complete(|_| {})
        .await
        .expect_err("exhaustion is a timeout");

    assert!(
        matches!(err, ProviderError::AcquisitionTimeout { ref execution_id } if execution_id == "exec-9"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn scaling_in_progress_is_retried(empty_pool: FakePool) {
    for _ in 0..2 {
        empty_pool
            .manager
            .push_set_outcome(Err(PoolError::ScalingInProgress {
                name: POOL.to_owned(),
            }));
    }
    empty_pool.manager.attach_fleet(Arc::clone(&empty_pool.leases));
    let provider = provider_for(&empty_pool, quick(5)).await;

    let mut seen = Vec::new();
    provider
        .acquire_instance_with("exec-1", provider.options())
        .complete(|progress| seen.push(progress))
        .await
        .expect("acquisition succeeds after contention");

    assert_eq!(empty_pool.manager.capacity_requests(), vec![4, 4, 4]);
    assert_eq!(
        seen,
        vec![
            Progress::Pending,
            Progress::Pending,
            Progress::Pending,
            Progress::Allocated,
            Progress::Started,
        ]
    );
}

#[rstest]
#[tokio::test]
async fn max_capacity_is_fatal_on_first_failure(empty_pool: FakePool) {
    empty_pool
        .manager
        .push_set_outcome(Err(PoolError::MaxCapacityExceeded {
            name: POOL.to_owned(),
            requested: 4,
            message: String::from("exceeds max size 3"),
        }));
    let provider = provider_for(&empty_pool, quick(30)).await;

    let mut acquisition = provider.acquire_instance_with("exec-1", provider.options());
    assert_eq!(
        acquisition.next_event().await.expect("first trial"),
        Some(Progress::Pending)
    );
    let err = acquisition
        .next_event()
        .await
        .expect_err("max capacity is fatal");

    assert!(
        matches!(err, ProviderError::MaxInstancesReached { ref pool, .. } if pool == POOL),
        "unexpected error: {err}"
    );
    assert_eq!(empty_pool.leases.acquire_checks(), 1);
    assert_eq!(acquisition.next_event().await.expect("sequence ended"), None);
}

#[rstest]
#[tokio::test]
async fn other_pool_failures_propagate_unchanged(empty_pool: FakePool) {
    let failure = PoolError::Provider {
        message: String::from("access denied"),
    };
    empty_pool.manager.push_set_outcome(Err(failure.clone()));
    let provider = provider_for(&empty_pool, quick(30)).await;

    let err = provider
        .acquire_instance_with("exec-1", provider.options())
        .complete(|_| {})
        .await
        .expect_err("provider failure propagates");

    assert!(
        matches!(err, ProviderError::Pool(ref inner) if *inner == failure),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn acquisitions_queue_behind_the_pool_lock(empty_pool: FakePool) {
    let provider = provider_for(&empty_pool, quick(30)).await;

    let mut first = provider.acquire_instance_with("exec-1", provider.options());
    assert_eq!(
        first.next_event().await.expect("first trial"),
        Some(Progress::Pending)
    );

    let mut second = provider.acquire_instance_with("exec-2", provider.options());
    assert!(
        timeout(Duration::from_millis(50), second.next_event())
            .await
            .is_err(),
        "second acquisition must wait for the lock"
    );

    drop(first);
    let progress = timeout(Duration::from_secs(1), second.next_event())
        .await
        .expect("lock released on drop")
        .expect("trial runs");
    assert_eq!(progress, Some(Progress::Pending));
}

#[rstest]
#[tokio::test]
async fn increase_capacity_waits_for_running_acquisition(empty_pool: FakePool) {
    let provider = provider_for(&empty_pool, quick(30)).await;

    let mut acquisition = provider.acquire_instance_with("exec-1", provider.options());
    acquisition.next_event().await.expect("first trial");
    assert!(
        timeout(Duration::from_millis(50), provider.increase_capacity(2))
            .await
            .is_err()
    );

    drop(acquisition);
    let desired = provider
        .increase_capacity(2)
        .await
        .expect("increase succeeds");
    assert_eq!(desired, 5);
    assert_eq!(empty_pool.manager.desired_capacity(POOL), Some(5));
}

#[tokio::test]
async fn release_clears_lease_and_rejects_unleased_ids() {
    let pool = FakePool::new(POOL, 1, 1);
    let provider = provider_for(&pool, quick(1)).await;

    provider
        .acquire_instance_with("exec-1", provider.options())
        .complete(|_| {})
        .await
        .expect("acquisition succeeds");
    provider
        .release_instance("exec-1")
        .await
        .expect("release succeeds");

    let err = provider
        .release_instance("exec-1")
        .await
        .expect_err("second release fails");
    assert!(
        matches!(err, ProviderError::NotLeased { ref execution_id } if execution_id == "exec-1"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn instance_for_wraps_leased_host() {
    let pool = FakePool::new(POOL, 1, 1);
    let provider = provider_for(&pool, quick(1)).await;
    provider
        .acquire_instance_with("exec-1", provider.options())
        .complete(|_| {})
        .await
        .expect("acquisition succeeds");

    let instance = provider
        .instance_for("exec-1")
        .await
        .expect("lookup succeeds")
        .expect("instance is leased");
    assert_eq!(instance.execution_id(), "exec-1");
    assert_eq!(pool.connector.hosts(), vec![String::from("i-0.internal")]);
    assert!(
        provider
            .instance_for("exec-2")
            .await
            .expect("lookup succeeds")
            .is_none()
    );
}

#[tokio::test]
async fn get_commands_reports_leased_executions() {
    let pool = FakePool::new(POOL, 2, 2);
    let provider = provider_for(&pool, quick(1)).await;
    for execution_id in ["exec-1", "exec-2"] {
        provider
            .acquire_instance_with(execution_id, provider.options())
            .complete(|_| {})
            .await
            .expect("acquisition succeeds");
    }

    let infos = provider.get_commands().await.expect("listing succeeds");
    let ids: Vec<_> = infos.iter().map(|info| info.execution_id.as_str()).collect();
    assert_eq!(ids, vec!["exec-1", "exec-2"]);
    assert!(infos.iter().all(|info| info.container_status == "running"));
}

#[tokio::test]
async fn push_delegates_to_images() {
    let pool = FakePool::new(POOL, 1, 0);
    let provider = provider_for(&pool, quick(1)).await;
    provider.push("plz/builds:abc").await.expect("push succeeds");
    assert_eq!(pool.images.pushed(), vec![String::from("plz/builds:abc")]);
}
