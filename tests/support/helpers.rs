use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use dutywatch::{
    BeaconClientOptions, BeaconNodeClient, DutyFetcher, MonitorConfig, OperatingMode,
};
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Client with millisecond backoff so retried failures do not slow the suite down.
pub fn fast_client(url: &str) -> BeaconNodeClient {
    let options = BeaconClientOptions {
        request_timeout: Duration::from_secs(2),
        max_attempts: 2,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(10),
    };
    BeaconNodeClient::with_options(url, options).expect("client for mock beacon must build")
}

pub fn monitor_config(url: &str, validators: &[&str], chunk_size: usize) -> Result<MonitorConfig> {
    MonitorConfig::builder()
        .beacon_url(url)
        .parse_validators(validators)?
        .max_validators_per_request(chunk_size)
        .build()
}

pub fn bounded_config(
    url: &str,
    validators: &[&str],
    interval: Duration,
    wait: Duration,
) -> Result<MonitorConfig> {
    MonitorConfig::builder()
        .beacon_url(url)
        .parse_validators(validators)?
        .mode(OperatingMode::BoundedCi)
        .interval(interval)
        .cicd_wait_time(wait)
        .request_timeout(Duration::from_secs(2))
        .build()
}

pub async fn connect_fetcher(url: &str, validators: &[&str], chunk_size: usize) -> Result<DutyFetcher> {
    let config = monitor_config(url, validators, chunk_size)?;
    DutyFetcher::connect(fast_client(url), &config).await
}
