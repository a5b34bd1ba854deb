use crate::duties::types::{DutyCollection, DutyMap};

/// Concatenates attestation, proposal and sync-committee duties, in that order, and sorts
/// them by slot. The sort is stable so ties keep their insertion order.
pub fn merge_duties(attestation: DutyMap, proposal: DutyMap, sync: DutyMap) -> DutyCollection {
    let mut duties: Vec<_> = attestation
        .into_values()
        .chain(proposal.into_values())
        .chain(sync.into_values())
        .collect();
    duties.sort_by_key(|duty| duty.slot());
    DutyCollection::from_sorted(duties)
}
