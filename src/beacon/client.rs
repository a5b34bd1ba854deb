//! HTTP client for the beacon node REST API. Houses `BeaconNodeClient`, its error
//! type, and the shared retry loop every endpoint goes through.

use crate::beacon::metrics::{ApiMetrics, ApiMetricsSnapshot};
use crate::beacon::options::BeaconClientOptions;
use crate::beacon::retry::{
    RetryContext, ATTESTER_DUTIES_RETRY, GENESIS_RETRY, PROPOSER_DUTIES_RETRY, SYNC_DUTIES_RETRY,
    VALIDATORS_RETRY,
};
use crate::beacon::types::{
    duty_path, quoted_indices, AttesterData, DutiesResponse, GenericResponse, GenesisData,
    ProposerData, SyncDuty, ValidatorData, ValidatorsPostRequest,
};
use crate::duties::types::{Epoch, ValidatorId, ValidatorIndex};
use crate::runtime::config::MonitorConfig;
use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::{future::Future, sync::Arc};
use tokio::time::{sleep, timeout, Instant};

const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug)]
pub enum BeaconApiError {
    Timeout {
        endpoint: &'static str,
    },
    Status {
        endpoint: &'static str,
        status: u16,
        message: String,
    },
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

impl BeaconApiError {
    /// Client errors and undecodable bodies will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BeaconApiError::Timeout { .. } => true,
            BeaconApiError::Status { status, .. } => *status >= 500,
            BeaconApiError::Decode { .. } => false,
        }
    }
}

impl std::fmt::Display for BeaconApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeaconApiError::Timeout { endpoint } => {
                write!(f, "beacon node {endpoint} request timed out")
            }
            BeaconApiError::Status {
                endpoint,
                status,
                message,
            } => write!(
                f,
                "beacon node {endpoint} request failed with status {status}: {message}"
            ),
            BeaconApiError::Decode { endpoint, message } => {
                write!(f, "beacon node {endpoint} response could not be decoded: {message}")
            }
        }
    }
}

impl std::error::Error for BeaconApiError {}

#[derive(Debug, Clone)]
pub struct BeaconNodeClient {
    base_url: Arc<Url>,
    client: Client,
    options: BeaconClientOptions,
    metrics: Arc<ApiMetrics>,
}

impl BeaconNodeClient {
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        Self::with_options(url, BeaconClientOptions::default())
    }

    pub fn with_options(url: impl AsRef<str>, options: BeaconClientOptions) -> Result<Self> {
        options.validate()?;

        let raw = url.as_ref().trim();
        // `Url::join` replaces the last path segment unless the base ends with '/'.
        let normalized = if raw.ends_with('/') {
            raw.to_owned()
        } else {
            format!("{raw}/")
        };
        let base_url =
            Url::parse(&normalized).with_context(|| format!("invalid beacon node url {raw}"))?;

        let client = Client::builder()
            .build()
            .map_err(|err| anyhow!("failed to build beacon node client: {err}"))?;

        Ok(Self {
            base_url: Arc::new(base_url),
            client,
            options,
            metrics: Arc::new(ApiMetrics::default()),
        })
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let options = BeaconClientOptions {
            request_timeout: config.request_timeout(),
            ..BeaconClientOptions::default()
        };
        Self::with_options(config.beacon_url(), options)
    }

    pub fn endpoint(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn metrics(&self) -> ApiMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn get_genesis_time(&self) -> Result<u64> {
        let url = self.url("eth/v1/beacon/genesis")?;
        let context = RetryContext::new(&GENESIS_RETRY);
        let response: GenericResponse<GenesisData> = self
            .retry_request(context, || self.execute(context, self.client.get(url.clone())))
            .await?;
        Ok(response.data.genesis_time)
    }

    /// Looks up validator records at the head state for the given identifiers.
    /// Identifiers unknown to the beacon node are simply absent from the result.
    pub async fn post_validators(&self, ids: &[ValidatorId]) -> Result<Vec<ValidatorData>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url("eth/v1/beacon/states/head/validators")?;
        let body = ValidatorsPostRequest {
            ids: ids.iter().map(ToString::to_string).collect(),
        };
        let context = RetryContext::new(&VALIDATORS_RETRY);
        let response: GenericResponse<Vec<ValidatorData>> = self
            .retry_request(context, || {
                self.execute(context, self.client.post(url.clone()).json(&body))
            })
            .await?;
        Ok(response.data)
    }

    pub async fn post_attester_duties(
        &self,
        epoch: Epoch,
        indices: &[ValidatorIndex],
    ) -> Result<Vec<AttesterData>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url(&duty_path("attester", epoch))?;
        let body = quoted_indices(indices);
        let context = RetryContext::with_epoch(&ATTESTER_DUTIES_RETRY, epoch);
        let response: DutiesResponse<Vec<AttesterData>> = self
            .retry_request(context, || {
                self.execute(context, self.client.post(url.clone()).json(&body))
            })
            .await?;
        Ok(response.data)
    }

    pub async fn get_proposer_duties(&self, epoch: Epoch) -> Result<Vec<ProposerData>> {
        let url = self.url(&duty_path("proposer", epoch))?;
        let context = RetryContext::with_epoch(&PROPOSER_DUTIES_RETRY, epoch);
        let response: DutiesResponse<Vec<ProposerData>> = self
            .retry_request(context, || self.execute(context, self.client.get(url.clone())))
            .await?;
        Ok(response.data)
    }

    pub async fn post_sync_duties(
        &self,
        epoch: Epoch,
        indices: &[ValidatorIndex],
    ) -> Result<Vec<SyncDuty>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url(&duty_path("sync", epoch))?;
        let body = quoted_indices(indices);
        let context = RetryContext::with_epoch(&SYNC_DUTIES_RETRY, epoch);
        let response: DutiesResponse<Vec<SyncDuty>> = self
            .retry_request(context, || {
                self.execute(context, self.client.post(url.clone()).json(&body))
            })
            .await?;
        Ok(response.data)
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("failed to build beacon node url for {path}"))
    }

    /// Retry loop shared by every endpoint: records metrics, backs off exponentially,
    /// and gives up immediately on errors a retry cannot fix.
    async fn retry_request<T, F, Fut>(&self, context: RetryContext<'_>, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let max_attempts = context.max_attempts(self.options.max_attempts);

        loop {
            attempt += 1;
            let start = Instant::now();

            match operation().await {
                Ok(value) => {
                    self.metrics.record_success(start.elapsed());
                    context.log_success(attempt);
                    return Ok(value);
                }
                Err(err) => {
                    let elapsed = start.elapsed();
                    let retryable = match err.downcast_ref::<BeaconApiError>() {
                        Some(BeaconApiError::Timeout { .. }) => {
                            self.metrics.record_timeout(elapsed);
                            true
                        }
                        Some(api_error) => {
                            self.metrics.record_failure(elapsed);
                            api_error.is_retryable()
                        }
                        None => {
                            self.metrics.record_failure(elapsed);
                            true
                        }
                    };

                    if !retryable {
                        context.log_rejected(attempt, &err);
                        return Err(err);
                    }

                    if attempt >= max_attempts {
                        context.log_exhausted(attempt, &err);
                        return Err(err);
                    }

                    let backoff = self.options.backoff_delay(attempt);
                    context.log_retry(attempt, backoff, &err);
                    sleep(backoff).await;
                }
            }
        }
    }

    async fn execute<T>(&self, context: RetryContext<'_>, request: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let endpoint = context.endpoint();
        let body = timeout(self.options.request_timeout, async {
            let response = request
                .send()
                .await
                .map_err(|err| map_transport_error(endpoint, err))?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(BeaconApiError::Status {
                    endpoint,
                    status: status.as_u16(),
                    message: truncate_message(message),
                }
                .into());
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|err| map_transport_error(endpoint, err))?;
            Ok::<_, anyhow::Error>(bytes)
        })
        .await
        .map_err(|_| BeaconApiError::Timeout { endpoint })??;

        serde_json::from_slice(&body).map_err(|err| {
            BeaconApiError::Decode {
                endpoint,
                message: err.to_string(),
            }
            .into()
        })
    }
}

fn map_transport_error(endpoint: &'static str, err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        return BeaconApiError::Timeout { endpoint }.into();
    }
    anyhow!("beacon node {endpoint} request failed: {err}")
}

fn truncate_message(message: String) -> String {
    if message.chars().count() <= MAX_ERROR_BODY_CHARS {
        return message;
    }
    let mut truncated: String = message.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}
