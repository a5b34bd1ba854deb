//! Decides when the poll loop stops: on an OS signal in every mode, and in bounded CI
//! mode once duties are done or the wait time has run out.

use crate::duties::types::{DutyCollection, Slot};
use crate::runtime::config::MonitorConfig;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Why a bounded run decided to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every held duty lies in the past.
    DutiesCompleted,
    /// The tick countdown reached zero first.
    TimedOut,
}

#[derive(Debug)]
pub struct GracefulTerminator {
    shutdown: CancellationToken,
    remaining_ticks: u64,
}

impl GracefulTerminator {
    /// Countdown of `floor(wait_time / interval)` ticks with a fresh shutdown token.
    pub fn new(wait_time: Duration, interval: Duration) -> Self {
        Self::with_cancellation_token(wait_time, interval, CancellationToken::new())
    }

    /// Same as [`GracefulTerminator::new`], sharing an existing shutdown token.
    pub fn with_cancellation_token(
        wait_time: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let remaining_ticks = if interval.is_zero() {
            0
        } else {
            (wait_time.as_nanos() / interval.as_nanos()).min(u128::from(u64::MAX)) as u64
        };
        Self {
            shutdown,
            remaining_ticks,
        }
    }

    pub fn from_config(config: &MonitorConfig, shutdown: CancellationToken) -> Self {
        Self::with_cancellation_token(config.cicd_wait_time(), config.interval(), shutdown)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn remaining_ticks(&self) -> u64 {
        self.remaining_ticks
    }

    /// Requests a stop from outside the loop.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn should_terminate(&mut self, duties: &DutyCollection, current_slot: Slot) -> bool {
        self.check(duties, current_slot).is_some()
    }

    /// Consumes one tick of the countdown and reports why the run should stop, if it
    /// should. Completed duties take precedence over the countdown.
    pub fn check(&mut self, duties: &DutyCollection, current_slot: Slot) -> Option<Termination> {
        if !duties.is_empty() && duties.iter().all(|duty| duty.slot() < current_slot) {
            return Some(Termination::DutiesCompleted);
        }

        self.count_down()
    }

    /// Consumes one tick of the countdown without looking at the duties. Used on ticks
    /// whose held duties could not be refreshed.
    pub fn count_down(&mut self) -> Option<Termination> {
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
        (self.remaining_ticks == 0).then_some(Termination::TimedOut)
    }

    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        spawn_signal_listener(self.shutdown.clone())
    }
}

/// Spawns a task cancelling `shutdown` on SIGINT, and on SIGTERM where supported.
/// The task ends on its own once the token is cancelled elsewhere.
pub fn spawn_signal_listener(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                info!("termination signal received; stopping monitor");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler; listening for Ctrl-C only");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        // Without a handler the loop can still be stopped through the token.
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
