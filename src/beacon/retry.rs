//! Retry context and canned log messages shared by every beacon API operation so
//! instrumentation reads the same regardless of the endpoint.

use crate::duties::types::Epoch;
use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(epoch) = $ctx.epoch {
            tracing::$level!(
                endpoint = $ctx.messages.endpoint,
                epoch,
                $($rest)*
            );
        } else {
            tracing::$level!(endpoint = $ctx.messages.endpoint, $($rest)*);
        }
    }};
}

/// Log labels describing how one endpoint reports retries and failures.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) endpoint: &'static str,
    pub(crate) success: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) rejected: &'static str,
    /// Overrides the client's attempt budget. Duty lookups make a single attempt since
    /// the poll loop retries them on its next tick.
    pub(crate) max_attempts: Option<usize>,
}

/// Passed into `BeaconNodeClient::retry_request` so callers can attach the epoch
/// being queried and reuse consistent messaging.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    epoch: Option<Epoch>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self {
            epoch: None,
            messages,
        }
    }

    pub(crate) fn with_epoch(messages: &'a RetryMessages, epoch: Epoch) -> Self {
        Self {
            epoch: Some(epoch),
            messages,
        }
    }

    pub(crate) fn endpoint(&self) -> &'static str {
        self.messages.endpoint
    }

    pub(crate) fn max_attempts(&self, default: usize) -> usize {
        self.messages.max_attempts.unwrap_or(default)
    }

    pub(crate) fn log_success(&self, attempt: usize) {
        log_with_retry_ctx!(debug, self, attempt, "{}", self.messages.success);
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error) {
        let backoff_ms = backoff.as_millis().min(u128::from(u64::MAX)) as u64;
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms,
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_rejected(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(warn, self, attempt, error = %err, "{}", self.messages.rejected);
    }
}

pub(crate) const GENESIS_RETRY: RetryMessages = RetryMessages {
    endpoint: "genesis",
    success: "fetched genesis",
    retry: "genesis request failed; retrying",
    exhausted: "genesis request exhausted retries",
    rejected: "beacon node rejected genesis request",
    max_attempts: None,
};

pub(crate) const VALIDATORS_RETRY: RetryMessages = RetryMessages {
    endpoint: "validators",
    success: "fetched validator states",
    retry: "validator state request failed; retrying",
    exhausted: "validator state request exhausted retries",
    rejected: "beacon node rejected validator state request",
    max_attempts: None,
};

pub(crate) const ATTESTER_DUTIES_RETRY: RetryMessages = RetryMessages {
    endpoint: "attester_duties",
    success: "fetched attester duties",
    retry: "attester duties request failed; retrying",
    exhausted: "attester duties request exhausted retries",
    rejected: "beacon node rejected attester duties request",
    max_attempts: Some(1),
};

pub(crate) const PROPOSER_DUTIES_RETRY: RetryMessages = RetryMessages {
    endpoint: "proposer_duties",
    success: "fetched proposer duties",
    retry: "proposer duties request failed; retrying",
    exhausted: "proposer duties request exhausted retries",
    rejected: "beacon node rejected proposer duties request",
    max_attempts: Some(1),
};

pub(crate) const SYNC_DUTIES_RETRY: RetryMessages = RetryMessages {
    endpoint: "sync_duties",
    success: "fetched sync committee duties",
    retry: "sync committee duties request failed; retrying",
    exhausted: "sync committee duties request exhausted retries",
    rejected: "beacon node rejected sync committee duties request",
    max_attempts: Some(1),
};
