//! Duty lookups against the beacon node.
//!
//! `DutyFetcher` owns the resolved validator set and the cached genesis time, and turns
//! raw attester, proposer and sync-committee responses into one `ValidatorDuty` per
//! validator. Each operation tolerates partial failure: a failing request only loses the
//! validators it covered, and the operation errors only when every request failed.

use crate::beacon::BeaconNodeClient;
use crate::duties::identifier::{fetch_validator_registry, ValidatorRegistry};
use crate::duties::types::{
    DutyMap, Epoch, Slot, SyncCommitteePeriod, ValidatorDuty, ValidatorIdentifier, ValidatorIndex,
};
use crate::runtime::clock::ChainTiming;
use crate::runtime::config::MonitorConfig;
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, warn};

/// Source of upcoming duties, keyed by validator. Implemented by [`DutyFetcher`] and by
/// test doubles driving the poll loop.
pub trait DutySource: Send + Sync {
    /// Earliest attestation strictly after `current_slot`, per validator.
    fn fetch_attestation_duties(&self, current_slot: Slot) -> BoxFuture<'_, Result<DutyMap>>;

    /// Earliest block proposal strictly after `current_slot`, per validator.
    fn fetch_proposal_duties(&self, current_slot: Slot) -> BoxFuture<'_, Result<DutyMap>>;

    /// Current or next sync-committee membership, per validator.
    fn fetch_sync_committee_duties(&self, current_slot: Slot) -> BoxFuture<'_, Result<DutyMap>>;
}

pub struct DutyFetcher {
    client: BeaconNodeClient,
    registry: ValidatorRegistry,
    genesis_time: u64,
    timing: ChainTiming,
    chunk_size: usize,
}

impl DutySource for DutyFetcher {
    fn fetch_attestation_duties(&self, current_slot: Slot) -> BoxFuture<'_, Result<DutyMap>> {
        Box::pin(self.attestation_duties(current_slot))
    }

    fn fetch_proposal_duties(&self, current_slot: Slot) -> BoxFuture<'_, Result<DutyMap>> {
        Box::pin(self.proposal_duties(current_slot))
    }

    fn fetch_sync_committee_duties(&self, current_slot: Slot) -> BoxFuture<'_, Result<DutyMap>> {
        Box::pin(self.sync_committee_duties(current_slot))
    }
}

impl DutyFetcher {
    /// Looks up genesis and resolves the configured validators. Fails when genesis is
    /// unavailable or no configured validator is active.
    pub async fn connect(client: BeaconNodeClient, config: &MonitorConfig) -> Result<Self> {
        let genesis_time = client
            .get_genesis_time()
            .await
            .with_context(|| format!("failed to fetch genesis from {}", client.endpoint()))?;
        let registry = fetch_validator_registry(
            &client,
            config.validators(),
            config.max_validators_per_request(),
        )
        .await?;

        Ok(Self::new(
            client,
            registry,
            genesis_time,
            config.timing(),
            config.max_validators_per_request(),
        ))
    }

    pub fn new(
        client: BeaconNodeClient,
        registry: ValidatorRegistry,
        genesis_time: u64,
        timing: ChainTiming,
        chunk_size: usize,
    ) -> Self {
        Self {
            client,
            registry,
            genesis_time,
            timing,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Genesis timestamp in seconds, fetched once in [`DutyFetcher::connect`].
    pub fn genesis_time(&self) -> u64 {
        self.genesis_time
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn client(&self) -> &BeaconNodeClient {
        &self.client
    }

    async fn attestation_duties(&self, current_slot: Slot) -> Result<DutyMap> {
        let epoch = self.timing.epoch_of(current_slot);
        let client = &self.client;
        let mut upcoming = BTreeMap::new();
        let mut pending = self.registry.indices();
        let mut outcome = RequestTally::default();

        // One attestation per epoch: the next epoch is only needed for validators whose
        // attestation in the current epoch has already passed.
        for target in [epoch, epoch.saturating_add(1)] {
            if pending.is_empty() {
                break;
            }
            let batch = collect_chunks(
                &pending,
                self.chunk_size,
                "attester_duties",
                target,
                move |chunk| async move { client.post_attester_duties(target, &chunk).await },
            )
            .await;
            outcome.absorb(&batch);
            keep_earliest_upcoming(
                &mut upcoming,
                batch.items.iter().map(|duty| (duty.validator_index, duty.slot)),
                current_slot,
            );
            // Validators whose lookup failed are dropped rather than given a later duty.
            pending.retain(|index| {
                !upcoming.contains_key(index) && !batch.failed.contains(index)
            });
        }

        if outcome.all_failed() {
            bail!("attester duties unavailable for epoch {epoch}");
        }
        debug!(epoch, duties = upcoming.len(), "collected attester duties");
        Ok(self.duty_map(upcoming, ValidatorDuty::attestation))
    }

    async fn proposal_duties(&self, current_slot: Slot) -> Result<DutyMap> {
        let epoch = self.timing.epoch_of(current_slot);
        let mut upcoming = BTreeMap::new();
        let mut outcome = RequestTally::default();

        // Proposer duties cover every validator on the network; only ours are kept.
        for target in [epoch, epoch.saturating_add(1)] {
            outcome.requests += 1;
            match self.client.get_proposer_duties(target).await {
                Ok(duties) => keep_earliest_upcoming(
                    &mut upcoming,
                    duties
                        .iter()
                        .filter(|duty| self.registry.by_index(duty.validator_index).is_some())
                        .map(|duty| (duty.validator_index, duty.slot)),
                    current_slot,
                ),
                Err(err) => {
                    outcome.failures += 1;
                    warn!(epoch = target, error = %err, "proposer duty lookup failed");
                }
            }
        }

        if outcome.all_failed() {
            bail!("proposer duties unavailable for epoch {epoch}");
        }
        debug!(epoch, duties = upcoming.len(), "collected proposer duties");
        Ok(self.duty_map(upcoming, ValidatorDuty::proposal))
    }

    async fn sync_committee_duties(&self, current_slot: Slot) -> Result<DutyMap> {
        let epoch = self.timing.epoch_of(current_slot);
        let next_period = self.timing.next_sync_committee_period_start(epoch);
        // Both windows meet at the period boundary: current members leave, next members join.
        let boundary_slot = self.timing.first_slot_of(next_period);
        let indices = self.registry.indices();
        let client = &self.client;
        let mut outcome = RequestTally::default();
        let mut duties = DutyMap::new();

        for (target, period) in [
            (epoch, SyncCommitteePeriod::Current),
            (next_period, SyncCommitteePeriod::Next),
        ] {
            let batch = collect_chunks(
                &indices,
                self.chunk_size,
                "sync_duties",
                target,
                move |chunk| async move { client.post_sync_duties(target, &chunk).await },
            )
            .await;
            outcome.absorb(&batch);

            for member in &batch.items {
                let Some(validator) = self.registry.by_index(member.validator_index) else {
                    continue;
                };
                duties.entry(validator.clone()).or_insert_with(|| {
                    ValidatorDuty::sync_committee(validator.clone(), boundary_slot, period)
                });
            }
        }

        if outcome.all_failed() {
            bail!("sync committee duties unavailable for epoch {epoch}");
        }
        debug!(epoch, duties = duties.len(), "collected sync committee duties");
        Ok(duties)
    }

    fn duty_map(
        &self,
        upcoming: BTreeMap<ValidatorIndex, Slot>,
        build: fn(ValidatorIdentifier, Slot) -> ValidatorDuty,
    ) -> DutyMap {
        upcoming
            .into_iter()
            .filter_map(|(index, slot)| {
                let validator = self.registry.by_index(index)?;
                Some((validator.clone(), build(validator.clone(), slot)))
            })
            .collect()
    }
}

/// Counts requests so an operation can tell partial failure from total failure.
#[derive(Debug, Default, Clone, Copy)]
struct RequestTally {
    requests: usize,
    failures: usize,
}

impl RequestTally {
    fn absorb<T>(&mut self, batch: &ChunkedResponse<T>) {
        self.requests += batch.requests;
        self.failures += batch.failures;
    }

    fn all_failed(&self) -> bool {
        self.requests > 0 && self.failures == self.requests
    }
}

struct ChunkedResponse<T> {
    items: Vec<T>,
    requests: usize,
    failures: usize,
    /// Indices covered by the failed requests.
    failed: Vec<ValidatorIndex>,
}

/// Issues one request per chunk of `indices`. Failed chunks are logged and skipped.
async fn collect_chunks<T, F, Fut>(
    indices: &[ValidatorIndex],
    chunk_size: usize,
    endpoint: &'static str,
    epoch: Epoch,
    request: F,
) -> ChunkedResponse<T>
where
    F: Fn(Vec<ValidatorIndex>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut response = ChunkedResponse {
        items: Vec::new(),
        requests: 0,
        failures: 0,
        failed: Vec::new(),
    };

    for chunk in indices.chunks(chunk_size.max(1)) {
        response.requests += 1;
        match request(chunk.to_vec()).await {
            Ok(mut items) => response.items.append(&mut items),
            Err(err) => {
                response.failures += 1;
                response.failed.extend_from_slice(chunk);
                warn!(
                    endpoint,
                    epoch,
                    validators = chunk.len(),
                    error = %err,
                    "duty lookup failed; skipping these validators"
                );
            }
        }
    }

    response
}

/// Keeps, per validator, the earliest slot strictly after `current_slot`.
fn keep_earliest_upcoming(
    upcoming: &mut BTreeMap<ValidatorIndex, Slot>,
    duties: impl IntoIterator<Item = (ValidatorIndex, Slot)>,
    current_slot: Slot,
) {
    for (index, slot) in duties {
        if slot <= current_slot {
            continue;
        }
        upcoming
            .entry(index)
            .and_modify(|earliest| *earliest = (*earliest).min(slot))
            .or_insert(slot);
    }
}
