use crate::beacon::BeaconNodeClient;
use crate::duties::fetcher::DutyFetcher;
use crate::monitor::report::LogReporter;
use crate::monitor::terminator::{spawn_signal_listener, GracefulTerminator};
use crate::monitor::{DutySnapshot, PollLoop, RunOutcome};
use crate::runtime::clock::{SlotClock, SystemSlotClock};
use crate::runtime::config::MonitorConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Connects to the beacon node, resolves validators and drives the poll loop.
pub struct Runner {
    config: MonitorConfig,
    shutdown: CancellationToken,
    telemetry: Arc<Telemetry>,
    snapshot_rx: watch::Receiver<DutySnapshot>,
    /// Handed to the first poll loop; dropped when that run ends.
    snapshot_tx: Mutex<Option<watch::Sender<DutySnapshot>>>,
}

impl Runner {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_cancellation_token(config, CancellationToken::new())
    }

    pub fn with_cancellation_token(config: MonitorConfig, shutdown: CancellationToken) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(DutySnapshot::default());
        Self {
            config,
            shutdown,
            telemetry: Arc::new(Telemetry::default()),
            snapshot_rx,
            snapshot_tx: Mutex::new(Some(snapshot_tx)),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Receiver of every collection the poll loop reports. Closed once the first run
    /// has ended, whether or not the loop was reached.
    pub fn subscribe(&self) -> watch::Receiver<DutySnapshot> {
        self.snapshot_rx.clone()
    }

    /// Runs until the loop stops on its own or the shutdown token is cancelled.
    ///
    /// Errors only before the loop starts: an unreachable beacon node or no active
    /// validator among the configured ones.
    pub async fn run(&self) -> Result<RunOutcome> {
        let snapshot_tx = self
            .snapshot_tx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        let client = BeaconNodeClient::from_config(&self.config)?;
        tracing::info!(
            endpoint = client.endpoint(),
            validators = self.config.validators().len(),
            mode = %self.config.mode(),
            "connecting to beacon node"
        );

        let fetcher = tokio::select! {
            fetcher = DutyFetcher::connect(client, &self.config) => fetcher?,
            _ = self.shutdown.cancelled() => {
                tracing::info!("shutdown requested before the monitor started");
                return Ok(RunOutcome::Interrupted);
            }
        };

        let clock = SystemSlotClock::new(fetcher.genesis_time(), self.config.timing());
        tracing::info!(
            genesis_time = fetcher.genesis_time(),
            slot = clock.current_slot(),
            validators = fetcher.registry().len(),
            "monitor ready"
        );

        let reporter = LogReporter::new(clock.clone(), self.config.alert_window());
        let terminator = GracefulTerminator::from_config(&self.config, self.shutdown.clone());
        let mut poll_loop = PollLoop::new(&self.config, fetcher, reporter, clock, terminator)
            .with_telemetry(self.telemetry());
        if let Some(tx) = snapshot_tx {
            poll_loop = poll_loop.with_snapshot_sender(tx);
        }

        let outcome = poll_loop.run().await;
        self.telemetry
            .record_api_metrics(&poll_loop.source().client().metrics());
        self.telemetry.log_summary();
        Ok(outcome)
    }

    /// Same as [`Runner::run`], also stopping on Ctrl-C (SIGINT) or SIGTERM.
    pub async fn run_until_signal(&self) -> Result<RunOutcome> {
        let listener = spawn_signal_listener(self.shutdown.clone());
        let result = self.run().await;
        listener.abort();
        result
    }
}
