use crate::duties::types::{DutyCollection, Slot};

/// Whether the held duties must be re-fetched for `current_slot`.
///
/// Sync-committee duties are long-lived and never make the data fresh; only the earliest
/// attestation or proposal counts, and it must still lie strictly in the future.
pub fn is_stale(duties: &DutyCollection, current_slot: Slot) -> bool {
    match duties.iter().find(|duty| !duty.is_sync_committee()) {
        Some(next) => next.slot() <= current_slot,
        None => true,
    }
}
