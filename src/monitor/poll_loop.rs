//! The top-level monitor loop.
//!
//! Each tick checks whether the held duties are still valid for the current slot,
//! re-fetches and merges them when they are not, reports them, and in bounded CI mode
//! asks the terminator whether to stop. The only suspension points are the fetches and
//! the per-tick sleep, which races the shutdown token.

use crate::duties::fetcher::DutySource;
use crate::duties::types::{DutyCollection, DutyMap, Slot};
use crate::monitor::merge::merge_duties;
use crate::monitor::report::DutyReporter;
use crate::monitor::staleness::is_stale;
use crate::monitor::terminator::{GracefulTerminator, Termination};
use crate::runtime::clock::SlotClock;
use crate::runtime::config::{MonitorConfig, OperatingMode};
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// A stop was decided; the loop exits after the current sleep.
    Stopping,
    Stopped,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Interrupted,
    DutiesCompleted,
    TimedOut,
}

impl RunOutcome {
    /// Only a timed-out bounded run fails, unless timeouts are forced to count as success.
    pub fn is_failure(&self, force_graceful_exit: bool) -> bool {
        *self == RunOutcome::TimedOut && !force_graceful_exit
    }
}

impl From<Termination> for RunOutcome {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::DutiesCompleted => RunOutcome::DutiesCompleted,
            Termination::TimedOut => RunOutcome::TimedOut,
        }
    }
}

/// What the loop last reported, published for read-only consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DutySnapshot {
    pub current_slot: Slot,
    pub duties: DutyCollection,
}

pub struct PollLoop<S, R, C> {
    source: S,
    reporter: R,
    clock: C,
    terminator: GracefulTerminator,
    interval: Duration,
    mode: OperatingMode,
    omit_attestation_duties: bool,
    telemetry: Arc<Telemetry>,
    duties: DutyCollection,
    state: LoopState,
    outcome: Option<RunOutcome>,
    snapshot_tx: Option<watch::Sender<DutySnapshot>>,
}

impl<S, R, C> PollLoop<S, R, C>
where
    S: DutySource,
    R: DutyReporter,
    C: SlotClock,
{
    pub fn new(
        config: &MonitorConfig,
        source: S,
        reporter: R,
        clock: C,
        terminator: GracefulTerminator,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(DutySnapshot::default());
        Self {
            source,
            reporter,
            clock,
            terminator,
            interval: config.interval(),
            mode: config.mode(),
            omit_attestation_duties: config.omit_attestation_duties(),
            telemetry: Arc::new(Telemetry::default()),
            duties: DutyCollection::new(),
            state: LoopState::Running,
            outcome: None,
            snapshot_tx: Some(snapshot_tx),
        }
    }

    /// Shares counters with the caller instead of using private ones.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Publishes snapshots on a channel created by the caller.
    pub fn with_snapshot_sender(mut self, tx: watch::Sender<DutySnapshot>) -> Self {
        self.snapshot_tx = Some(tx);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn duties(&self) -> &DutyCollection {
        &self.duties
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Receiver of every reported collection. Closed once the loop has stopped.
    pub fn subscribe(&self) -> watch::Receiver<DutySnapshot> {
        match &self.snapshot_tx {
            Some(tx) => tx.subscribe(),
            None => watch::channel(DutySnapshot::default()).1,
        }
    }

    /// Drives ticks until the terminator or an interrupt stops the loop.
    /// A stopped loop returns its previous outcome immediately.
    pub async fn run(&mut self) -> RunOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }

        let shutdown = self.terminator.cancellation_token();
        let mut decided: Option<Termination> = None;
        info!(
            mode = %self.mode,
            interval_ms = self.interval.as_millis() as u64,
            "poll loop started"
        );

        while self.state == LoopState::Running {
            if shutdown.is_cancelled() {
                info!("interrupt received; stopping poll loop");
                break;
            }
            self.telemetry.record_tick();

            if self.mode != OperatingMode::ObservationOnly {
                let current_slot = self.clock.current_slot();
                // A tick blocked on a slow node must not hold back an interrupt.
                let up_to_date = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("interrupt received during tick; stopping poll loop");
                        break;
                    }
                    up_to_date = self.tick(current_slot) => up_to_date,
                };

                if self.mode == OperatingMode::BoundedCi {
                    // Duties kept through a failed refresh are stale, not completed.
                    let verdict = if up_to_date {
                        self.terminator.check(&self.duties, current_slot)
                    } else {
                        self.terminator.count_down()
                    };
                    if let Some(termination) = verdict {
                        info!(
                            reason = ?termination,
                            slot = current_slot,
                            "bounded run finished; stopping after this interval"
                        );
                        decided = Some(termination);
                        self.state = LoopState::Stopping;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("interrupt received; stopping poll loop");
                    break;
                }
                _ = sleep(self.interval) => {}
            }
        }

        let outcome = decided.map_or(RunOutcome::Interrupted, RunOutcome::from);
        self.cleanup(outcome);
        outcome
    }

    /// Returns false when the held duties are stale and could not be refreshed.
    async fn tick(&mut self, current_slot: Slot) -> bool {
        let mut up_to_date = true;
        if is_stale(&self.duties, current_slot) {
            debug!(slot = current_slot, "held duties are stale; refreshing");
            up_to_date = self.refresh(current_slot).await;
        }

        self.reporter.report(&self.duties, current_slot);
        self.telemetry.record_duties_reported(self.duties.len() as u64);
        self.publish(current_slot);
        up_to_date
    }

    /// Runs the three lookups once. When every attempted lookup fails the held duties
    /// stay as they are and false is returned; otherwise failed lookups contribute
    /// nothing.
    async fn refresh(&mut self, current_slot: Slot) -> bool {
        let attestation = if self.omit_attestation_duties {
            None
        } else {
            Some(self.source.fetch_attestation_duties(current_slot).await)
        };
        let proposal = self.source.fetch_proposal_duties(current_slot).await;
        let sync = self.source.fetch_sync_committee_duties(current_slot).await;

        let all_failed = attestation.as_ref().map_or(true, Result::is_err)
            && proposal.is_err()
            && sync.is_err();

        let attestation = match attestation {
            Some(result) => self.settle("attestation", result),
            None => DutyMap::new(),
        };
        let proposal = self.settle("proposal", proposal);
        let sync = self.settle("sync_committee", sync);

        if all_failed {
            warn!(
                slot = current_slot,
                duties = self.duties.len(),
                "every duty lookup failed; keeping previous duties until the next tick"
            );
            return false;
        }

        self.duties = merge_duties(attestation, proposal, sync);
        self.telemetry.record_refresh();
        info!(
            slot = current_slot,
            duties = self.duties.len(),
            "refreshed validator duties"
        );
        true
    }

    fn settle(&self, kind: &'static str, result: Result<DutyMap>) -> DutyMap {
        result.unwrap_or_else(|err| {
            self.telemetry.record_fetch_failure();
            warn!(kind, error = %err, "duty lookup failed");
            DutyMap::new()
        })
    }

    fn publish(&self, current_slot: Slot) {
        if let Some(tx) = &self.snapshot_tx {
            tx.send_replace(DutySnapshot {
                current_slot,
                duties: self.duties.clone(),
            });
        }
    }

    fn cleanup(&mut self, outcome: RunOutcome) {
        self.state = LoopState::Stopped;
        self.outcome = Some(outcome);
        if self.snapshot_tx.take().is_some() {
            debug!("closed duty snapshot channel");
        }
        info!(outcome = ?outcome, "poll loop stopped");
    }
}
