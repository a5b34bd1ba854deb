use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use dutywatch::{
    read_validator_file, split_validator_list, MonitorConfig, MonitorConfigBuilder, OperatingMode,
    Runner,
};

const DEFAULT_BEACON_URL: &str = "http://localhost:5052";
const DEFAULT_INTERVAL_SECS: u64 = 15;
const DEFAULT_CICD_WAIT_SECS: u64 = 780;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_VALIDATORS_PER_REQUEST: usize = 250;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dutywatch::init_tracing();

    let args = MonitorArgs::from_env()?;
    let config = args.to_monitor_config()?;
    let force_graceful_exit = config.cicd_force_graceful_exit();

    let runner = Runner::new(config);
    let outcome = runner.run_until_signal().await?;
    tracing::info!(outcome = ?outcome, "dutywatch finished");

    if outcome.is_failure(force_graceful_exit) {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

struct MonitorArgs {
    beacon_url: String,
    validators: Vec<String>,
    interval_secs: u64,
    mode: OperatingMode,
    cicd_wait_secs: u64,
    cicd_force_graceful_exit: bool,
    omit_attestation_duties: bool,
    request_timeout_secs: u64,
    max_validators_per_request: usize,
    alert_window_secs: Option<u64>,
}

impl MonitorArgs {
    fn from_env() -> Result<Self> {
        let beacon_url = read_env_or_default("DUTYWATCH_BEACON_URL", DEFAULT_BEACON_URL);

        let mut validators = split_validator_list(&read_env_or_default("DUTYWATCH_VALIDATORS", ""));
        if let Some(path) = read_optional_env("DUTYWATCH_VALIDATORS_FILE") {
            validators.extend(read_validator_file(&path)?);
        }

        let interval_secs =
            parse_env_with_default::<u64>("DUTYWATCH_INTERVAL_SECS", DEFAULT_INTERVAL_SECS)?;
        let mode = parse_env_with_default::<OperatingMode>("DUTYWATCH_MODE", OperatingMode::default())?;
        let cicd_wait_secs =
            parse_env_with_default::<u64>("DUTYWATCH_CICD_WAIT_SECS", DEFAULT_CICD_WAIT_SECS)?;
        let cicd_force_graceful_exit =
            parse_env_with_default::<bool>("DUTYWATCH_CICD_FORCE_GRACEFUL_EXIT", false)?;
        let omit_attestation_duties =
            parse_env_with_default::<bool>("DUTYWATCH_OMIT_ATTESTATION_DUTIES", false)?;
        let request_timeout_secs = parse_env_with_default::<u64>(
            "DUTYWATCH_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let max_validators_per_request = parse_env_with_default::<usize>(
            "DUTYWATCH_MAX_VALIDATORS_PER_REQUEST",
            DEFAULT_MAX_VALIDATORS_PER_REQUEST,
        )?;
        let alert_window_secs = read_optional_env("DUTYWATCH_ALERT_WINDOW_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .with_context(|| format!("failed to parse DUTYWATCH_ALERT_WINDOW_SECS='{value}'"))
            })
            .transpose()?;

        ensure!(
            !validators.is_empty(),
            "set DUTYWATCH_VALIDATORS or DUTYWATCH_VALIDATORS_FILE"
        );
        ensure!(
            interval_secs > 0,
            "DUTYWATCH_INTERVAL_SECS must be greater than 0"
        );

        Ok(Self {
            beacon_url,
            validators,
            interval_secs,
            mode,
            cicd_wait_secs,
            cicd_force_graceful_exit,
            omit_attestation_duties,
            request_timeout_secs,
            max_validators_per_request,
            alert_window_secs,
        })
    }

    fn to_monitor_config(&self) -> Result<MonitorConfig> {
        let mut builder = MonitorConfigBuilder::default()
            .beacon_url(self.beacon_url.clone())
            .parse_validators(&self.validators)?
            .interval(Duration::from_secs(self.interval_secs))
            .mode(self.mode)
            .cicd_wait_time(Duration::from_secs(self.cicd_wait_secs))
            .cicd_force_graceful_exit(self.cicd_force_graceful_exit)
            .omit_attestation_duties(self.omit_attestation_duties)
            .request_timeout(Duration::from_secs(self.request_timeout_secs))
            .max_validators_per_request(self.max_validators_per_request);

        if let Some(secs) = self.alert_window_secs {
            builder = builder.alert_window(Duration::from_secs(secs));
        }

        builder.build()
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    read_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn read_optional_env(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Into<anyhow::Error>,
{
    match env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(default),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(Into::into)
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
