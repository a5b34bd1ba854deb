use std::time::Duration;

use crate::support::{
    helpers::{bounded_config, init_tracing, unix_now},
    mock_beacon::{Endpoint, MockBeacon, MockBeaconServer},
};
use anyhow::Result;
use dutywatch::{MonitorConfig, OperatingMode, RunOutcome, Runner};
use tokio::time::{sleep, timeout};

/// Genesis far enough in the past that the chain is well past slot 0.
fn recent_genesis() -> u64 {
    unix_now() - 12 * 10_000
}

fn continuous_config(url: &str, mode: OperatingMode) -> Result<MonitorConfig> {
    MonitorConfig::builder()
        .beacon_url(url)
        .parse_validators(["1", "2"])?
        .mode(mode)
        .interval(Duration::from_millis(50))
        .request_timeout(Duration::from_secs(2))
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bounded_run_times_out_while_duties_are_upcoming() -> Result<()> {
    init_tracing();
    let beacon = MockBeacon::new(recent_genesis()).with_active([1, 2]);
    let server = MockBeaconServer::start(beacon.clone()).await?;
    let config = bounded_config(
        server.url(),
        &["1", "2"],
        Duration::from_millis(100),
        Duration::from_millis(300),
    )?;

    let runner = Runner::new(config);
    let outcome = timeout(Duration::from_secs(10), runner.run()).await??;

    assert_eq!(outcome, RunOutcome::TimedOut);
    assert!(outcome.is_failure(false));
    assert!(!outcome.is_failure(true));

    let telemetry = runner.telemetry().snapshot();
    assert_eq!(telemetry.ticks, 3);
    assert!(telemetry.refreshes >= 1);
    assert!(telemetry.duties_reported >= 2);
    assert!(beacon.request_count(Endpoint::AttesterDuties) >= 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribers_see_reported_duties_until_the_run_ends() -> Result<()> {
    init_tracing();
    let beacon = MockBeacon::new(recent_genesis()).with_active([1, 2]);
    let server = MockBeaconServer::start(beacon.clone()).await?;
    let config = bounded_config(
        server.url(),
        &["1", "2"],
        Duration::from_millis(100),
        Duration::from_millis(300),
    )?;
    let runner = Runner::new(config);
    let mut snapshots = runner.subscribe();

    let outcome = timeout(Duration::from_secs(10), runner.run()).await??;

    assert_eq!(outcome, RunOutcome::TimedOut);
    let snapshot = snapshots.borrow_and_update().clone();
    assert!(snapshot.current_slot >= 10_000);
    assert_eq!(snapshot.duties.len(), 2);
    assert!(snapshots.changed().await.is_err());
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn continuous_run_stops_on_cancellation() -> Result<()> {
    init_tracing();
    let beacon = MockBeacon::new(recent_genesis()).with_active([1, 2]);
    let server = MockBeaconServer::start(beacon.clone()).await?;
    let runner = Runner::new(continuous_config(server.url(), OperatingMode::Continuous)?);

    let token = runner.cancellation_token();
    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(300)).await;
        token.cancel();
    });

    let outcome = timeout(Duration::from_secs(10), runner.run()).await??;
    canceller.await?;

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(!outcome.is_failure(false));
    assert!(runner.telemetry().ticks() >= 2);
    assert!(runner.telemetry().refreshes() >= 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observation_only_run_never_fetches_duties() -> Result<()> {
    init_tracing();
    let beacon = MockBeacon::new(recent_genesis()).with_active([1, 2]);
    let server = MockBeaconServer::start(beacon.clone()).await?;
    let runner = Runner::new(continuous_config(server.url(), OperatingMode::ObservationOnly)?);

    let token = runner.cancellation_token();
    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let outcome = timeout(Duration::from_secs(10), runner.run()).await??;
    canceller.await?;

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(runner.telemetry().ticks() >= 1);
    assert_eq!(runner.telemetry().refreshes(), 0);
    assert_eq!(beacon.request_count(Endpoint::Validators), 1);
    assert_eq!(beacon.request_count(Endpoint::AttesterDuties), 0);
    assert_eq!(beacon.request_count(Endpoint::ProposerDuties), 0);
    assert_eq!(beacon.request_count(Endpoint::SyncDuties), 0);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_fails_before_the_loop_without_active_validators() -> Result<()> {
    init_tracing();
    let beacon = MockBeacon::new(recent_genesis());
    beacon.add_validator(1, "withdrawal_done");
    let server = MockBeaconServer::start(beacon.clone()).await?;
    let runner = Runner::new(continuous_config(server.url(), OperatingMode::Continuous)?);

    let err = timeout(Duration::from_secs(10), runner.run())
        .await?
        .expect_err("no active validator must fail the run");
    assert!(format!("{err:#}").contains("active validator"));
    assert_eq!(runner.telemetry().ticks(), 0);
    assert_eq!(beacon.request_count(Endpoint::AttesterDuties), 0);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_runner_does_not_start_the_loop() -> Result<()> {
    init_tracing();
    let beacon = MockBeacon::new(recent_genesis()).with_active([1]);
    let server = MockBeaconServer::start(beacon.clone()).await?;
    let runner = Runner::new(continuous_config(server.url(), OperatingMode::Continuous)?);

    runner.cancellation_token().cancel();
    let outcome = timeout(Duration::from_secs(10), runner.run()).await??;

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(runner.telemetry().ticks(), 0);
    server.shutdown().await;
    Ok(())
}
