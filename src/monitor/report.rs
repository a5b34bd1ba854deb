use crate::duties::types::{DutyCollection, DutyType, Slot, SyncCommitteePeriod, ValidatorDuty};
use crate::runtime::clock::SlotClock;
use std::time::Duration;
use tracing::{info, warn};

macro_rules! log_at {
    ($alert:expr, $($rest:tt)*) => {{
        if $alert {
            warn!($($rest)*);
        } else {
            info!($($rest)*);
        }
    }};
}

/// Receives the held duties once per tick.
pub trait DutyReporter: Send {
    fn report(&mut self, duties: &DutyCollection, current_slot: Slot);
}

/// Writes one log line per duty with the time left until its slot.
#[derive(Debug, Clone)]
pub struct LogReporter<C: SlotClock> {
    clock: C,
    alert_window: Duration,
}

impl<C: SlotClock> LogReporter<C> {
    pub fn new(clock: C, alert_window: Duration) -> Self {
        Self {
            clock,
            alert_window,
        }
    }
}

impl<C: SlotClock> LogReporter<C> {
    /// Whether `duty` is escalated, and the time left rendered for the log line.
    fn assess(&self, duty: &ValidatorDuty) -> (bool, String) {
        let remaining = self.clock.duration_to_slot(duty.slot());
        let alert = is_alert(duty, remaining, self.alert_window);
        let remaining = remaining.map_or_else(|| "now".to_owned(), format_remaining);
        (alert, remaining)
    }
}

impl<C: SlotClock> DutyReporter for LogReporter<C> {
    fn report(&mut self, duties: &DutyCollection, current_slot: Slot) {
        if duties.is_empty() {
            info!(slot = current_slot, "no upcoming duties for the monitored validators");
            return;
        }

        for duty in duties {
            let (alert, remaining) = self.assess(duty);
            let validator = duty.validator();
            let slot = duty.slot();

            match (duty.duty_type(), duty.sync_period()) {
                (DutyType::SyncCommittee, Some(SyncCommitteePeriod::Current)) => {
                    log_at!(alert, validator = %validator, slot, remaining = %remaining,
                        "validator is in the current sync committee until the period ends");
                }
                (DutyType::SyncCommittee, _) => {
                    log_at!(alert, validator = %validator, slot, remaining = %remaining,
                        "validator joins the next sync committee");
                }
                (DutyType::Proposal, _) => {
                    log_at!(alert, validator = %validator, slot, remaining = %remaining,
                        "upcoming block proposal");
                }
                (DutyType::Attestation, _) => {
                    log_at!(alert, validator = %validator, slot, remaining = %remaining,
                        "upcoming attestation");
                }
            }
        }
    }
}

/// Proposals and sync-committee changes inside the alert window are escalated.
/// Attestations happen every epoch and never are.
fn is_alert(duty: &ValidatorDuty, remaining: Option<Duration>, window: Duration) -> bool {
    if duty.duty_type() == DutyType::Attestation {
        return false;
    }
    remaining.is_some_and(|remaining| remaining <= window)
}

/// `mm:ss`, `hh:mm:ss`, or `Nd hh:mm:ss` once a day or more remains.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    } else if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
