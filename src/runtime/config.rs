use crate::beacon::options::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::duties::types::ValidatorSpec;
use crate::runtime::clock::ChainTiming;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_INTERVAL_SECS: u64 = 15;
const DEFAULT_CICD_WAIT_TIME_SECS: u64 = 780;
const DEFAULT_MAX_VALIDATORS_PER_REQUEST: usize = 250;

/// How the poll loop behaves over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    /// Fetch and report on every tick until interrupted.
    #[default]
    Continuous,
    /// Only sleep; neither fetches nor reports. Useful when another consumer drives the
    /// process and the loop just keeps it alive.
    ObservationOnly,
    /// Fetch and report, then stop once no duties remain or the wait time has elapsed.
    BoundedCi,
}

impl FromStr for OperatingMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continuous" | "log" => Ok(OperatingMode::Continuous),
            "observation-only" | "observation" | "no-log" => Ok(OperatingMode::ObservationOnly),
            "bounded-ci" | "cicd" | "cicd-wait" => Ok(OperatingMode::BoundedCi),
            other => bail!(
                "unknown mode {other}; expected continuous, observation-only or bounded-ci"
            ),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperatingMode::Continuous => "continuous",
            OperatingMode::ObservationOnly => "observation-only",
            OperatingMode::BoundedCi => "bounded-ci",
        };
        f.write_str(label)
    }
}

/// Runtime configuration for the duty monitor.
///
/// All instances must be constructed via [`MonitorConfig::builder`] or [`MonitorConfig::new`]
/// so invariants are validated before the poll loop observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    beacon_url: String,
    validators: Vec<ValidatorSpec>,
    interval: Duration,
    mode: OperatingMode,
    cicd_wait_time: Duration,
    cicd_force_graceful_exit: bool,
    omit_attestation_duties: bool,
    request_timeout: Duration,
    max_validators_per_request: usize,
    alert_window: Duration,
    timing: ChainTiming,
}

pub struct MonitorConfigParams {
    pub beacon_url: String,
    pub validators: Vec<ValidatorSpec>,
    pub interval: Duration,
    pub mode: OperatingMode,
    pub cicd_wait_time: Duration,
    pub cicd_force_graceful_exit: bool,
    pub omit_attestation_duties: bool,
    pub request_timeout: Duration,
    pub max_validators_per_request: usize,
    pub alert_window: Duration,
    pub timing: ChainTiming,
}

impl MonitorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: MonitorConfigParams) -> Result<Self> {
        let MonitorConfigParams {
            beacon_url,
            validators,
            interval,
            mode,
            cicd_wait_time,
            cicd_force_graceful_exit,
            omit_attestation_duties,
            request_timeout,
            max_validators_per_request,
            alert_window,
            timing,
        } = params;

        let config = Self {
            beacon_url: beacon_url.trim().to_owned(),
            validators,
            interval,
            mode,
            cicd_wait_time,
            cicd_force_graceful_exit,
            omit_attestation_duties,
            request_timeout,
            max_validators_per_request,
            alert_window,
            timing,
        };

        config.validate()?;
        Ok(config)
    }

    /// Base URL of the beacon node REST API.
    pub fn beacon_url(&self) -> &str {
        &self.beacon_url
    }

    /// Validators to monitor, in the order the operator listed them.
    pub fn validators(&self) -> &[ValidatorSpec] {
        &self.validators
    }

    /// Sleep between two ticks of the poll loop.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Upper bound on a bounded CI run.
    pub fn cicd_wait_time(&self) -> Duration {
        self.cicd_wait_time
    }

    /// Report a timed-out bounded run as success.
    pub fn cicd_force_graceful_exit(&self) -> bool {
        self.cicd_force_graceful_exit
    }

    pub fn omit_attestation_duties(&self) -> bool {
        self.omit_attestation_duties
    }

    /// Per-request timeout applied by the beacon node client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Maximum number of validators sent in one beacon node request.
    pub fn max_validators_per_request(&self) -> usize {
        self.max_validators_per_request
    }

    /// Duties closer than this are reported at warn level.
    pub fn alert_window(&self) -> Duration {
        self.alert_window
    }

    pub fn timing(&self) -> ChainTiming {
        self.timing
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.beacon_url)?;

        if self.validators.is_empty() {
            bail!("at least one validator must be configured");
        }

        if self.interval.is_zero() {
            bail!("interval must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.max_validators_per_request == 0 {
            bail!("max_validators_per_request must be greater than 0");
        }

        self.timing.validate()?;

        if self.mode == OperatingMode::BoundedCi {
            if self.cicd_wait_time.is_zero() {
                bail!("cicd_wait_time must be greater than 0 in bounded-ci mode");
            }
            if self.cicd_wait_time < self.interval {
                bail!(
                    "cicd_wait_time ({}s) must cover at least one interval ({}s)",
                    self.cicd_wait_time.as_secs(),
                    self.interval.as_secs()
                );
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MonitorConfigBuilder {
    beacon_url: Option<String>,
    validators: Vec<ValidatorSpec>,
    interval: Option<Duration>,
    mode: Option<OperatingMode>,
    cicd_wait_time: Option<Duration>,
    cicd_force_graceful_exit: bool,
    omit_attestation_duties: bool,
    request_timeout: Option<Duration>,
    max_validators_per_request: Option<usize>,
    alert_window: Option<Duration>,
    timing: Option<ChainTiming>,
}

impl MonitorConfigBuilder {
    pub fn beacon_url(mut self, url: impl Into<String>) -> Self {
        self.beacon_url = Some(url.into());
        self
    }

    pub fn validator(mut self, validator: ValidatorSpec) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn validators(mut self, validators: impl IntoIterator<Item = ValidatorSpec>) -> Self {
        self.validators.extend(validators);
        self
    }

    /// Parses `<index|pubkey>[;alias]` entries, failing on the first malformed one.
    pub fn parse_validators<I, S>(mut self, raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in raw {
            let entry = entry.as_ref();
            let spec = entry
                .parse::<ValidatorSpec>()
                .with_context(|| format!("invalid validator entry {entry:?}"))?;
            self.validators.push(spec);
        }
        Ok(self)
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn mode(mut self, mode: OperatingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn cicd_wait_time(mut self, wait_time: Duration) -> Self {
        self.cicd_wait_time = Some(wait_time);
        self
    }

    pub fn cicd_force_graceful_exit(mut self, force: bool) -> Self {
        self.cicd_force_graceful_exit = force;
        self
    }

    pub fn omit_attestation_duties(mut self, omit: bool) -> Self {
        self.omit_attestation_duties = omit;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_validators_per_request(mut self, max: usize) -> Self {
        self.max_validators_per_request = Some(max);
        self
    }

    pub fn alert_window(mut self, window: Duration) -> Self {
        self.alert_window = Some(window);
        self
    }

    pub fn timing(mut self, timing: ChainTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn build(self) -> Result<MonitorConfig> {
        let timing = self.timing.unwrap_or_default();
        let one_epoch = timing
            .slot_duration()
            .saturating_mul(timing.slots_per_epoch.min(u64::from(u32::MAX)) as u32);

        let params = MonitorConfigParams {
            beacon_url: self.beacon_url.context("beacon_url is required")?,
            validators: self.validators,
            interval: self
                .interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_INTERVAL_SECS)),
            mode: self.mode.unwrap_or_default(),
            cicd_wait_time: self
                .cicd_wait_time
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_CICD_WAIT_TIME_SECS)),
            cicd_force_graceful_exit: self.cicd_force_graceful_exit,
            omit_attestation_duties: self.omit_attestation_duties,
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            max_validators_per_request: self
                .max_validators_per_request
                .unwrap_or(DEFAULT_MAX_VALIDATORS_PER_REQUEST),
            alert_window: self.alert_window.unwrap_or(one_epoch),
            timing,
        };

        MonitorConfig::new(params)
    }
}

/// Splits a validator list on commas and whitespace.
pub fn split_validator_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

/// One validator entry per line; blank lines and `#` comments are skipped.
pub fn parse_validator_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn read_validator_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read validator file {}", path.display()))?;
    Ok(parse_validator_lines(&contents))
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        bail!("beacon_url cannot be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("beacon_url must start with http:// or https://");
    }
    Ok(())
}
