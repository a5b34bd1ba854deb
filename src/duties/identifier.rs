//! Turns operator supplied validator references into canonical identifiers.
//!
//! Resolution asks the beacon node for the head-state record of every configured
//! reference, keeps active validators only, and collapses references that point at the
//! same validator. Inactive and duplicate entries are logged and excluded; the run only
//! fails when nothing at all resolves.

use crate::beacon::types::ValidatorData;
use crate::beacon::BeaconNodeClient;
use crate::duties::types::{
    PublicKeyBytes, ValidatorId, ValidatorIdentifier, ValidatorIndex, ValidatorSpec,
};
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Active validators being monitored, ordered by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorRegistry {
    validators: Vec<ValidatorIdentifier>,
}

impl ValidatorRegistry {
    pub fn new(validators: impl IntoIterator<Item = ValidatorIdentifier>) -> Self {
        let mut by_index = BTreeMap::new();
        let mut without_index = Vec::new();
        for validator in validators {
            match validator.index {
                Some(index) => {
                    by_index.entry(index).or_insert(validator);
                }
                None => without_index.push(validator),
            }
        }
        let mut validators: Vec<_> = by_index.into_values().collect();
        for validator in without_index {
            if !validators.iter().any(|known| known.same_validator(&validator)) {
                validators.push(validator);
            }
        }
        Self { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidatorIdentifier> {
        self.validators.iter()
    }

    /// Indices of every resolved validator, ascending.
    pub fn indices(&self) -> Vec<ValidatorIndex> {
        self.validators.iter().filter_map(|v| v.index).collect()
    }

    pub fn by_index(&self, index: ValidatorIndex) -> Option<&ValidatorIdentifier> {
        self.validators
            .binary_search_by(|entry| match entry.index {
                Some(entry_index) => entry_index.cmp(&index),
                None => std::cmp::Ordering::Greater,
            })
            .ok()
            .map(|position| &self.validators[position])
    }
}

/// Outcome of matching configured references against beacon node records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub registry: ValidatorRegistry,
    /// References that matched no active validator.
    pub inactive: Vec<ValidatorId>,
    /// Validators listed both by index and by pubkey.
    pub duplicates: Vec<(ValidatorIndex, PublicKeyBytes)>,
}

/// Matches `specs` against the records returned by the beacon node.
///
/// A validator counts as duplicate only when both its index and its pubkey were
/// provided; any other repeat collapses silently.
pub fn resolve_validators(specs: &[ValidatorSpec], records: &[ValidatorData]) -> Resolution {
    let provided = unique_ids(specs);

    let mut resolved: BTreeMap<ValidatorIndex, ValidatorIdentifier> = BTreeMap::new();
    for record in records.iter().filter(|record| record.is_active()) {
        let identifier = ValidatorIdentifier::new(Some(record.index), record.validator.pubkey);
        if !provided.iter().any(|id| identifier.matches_id(id)) {
            debug!(
                index = record.index,
                "beacon node returned a validator that was not requested"
            );
            continue;
        }
        resolved
            .entry(record.index)
            .or_insert_with(|| identifier.clone().with_alias(alias_for(specs, &identifier)));
    }

    let duplicates = resolved
        .values()
        .filter_map(|validator| {
            let index = validator.index?;
            let listed_by_index = provided.contains(&ValidatorId::ByIndex(index));
            let listed_by_pubkey = provided.contains(&ValidatorId::ByPubkey(validator.pubkey));
            (listed_by_index && listed_by_pubkey).then_some((index, validator.pubkey))
        })
        .collect();

    let inactive = provided
        .iter()
        .filter(|id| !resolved.values().any(|validator| validator.matches_id(id)))
        .copied()
        .collect();

    Resolution {
        registry: ValidatorRegistry::new(resolved.into_values()),
        inactive,
        duplicates,
    }
}

/// Resolves the configured validators through the beacon node, in chunks of
/// `chunk_size` references. A failing chunk only loses its own validators.
pub async fn fetch_validator_registry(
    client: &BeaconNodeClient,
    specs: &[ValidatorSpec],
    chunk_size: usize,
) -> Result<ValidatorRegistry> {
    let ids = unique_ids(specs);
    let chunk_size = chunk_size.max(1);

    let mut records = Vec::new();
    let mut failed_chunks = 0usize;
    let mut unresolved: Vec<ValidatorId> = Vec::new();
    let total_chunks = ids.len().div_ceil(chunk_size);

    for chunk in ids.chunks(chunk_size) {
        match client.post_validators(chunk).await {
            Ok(mut fetched) => records.append(&mut fetched),
            Err(err) => {
                failed_chunks += 1;
                warn!(
                    error = %err,
                    validators = chunk.len(),
                    "validator lookup failed; skipping this chunk"
                );
                unresolved.extend_from_slice(chunk);
            }
        }
    }

    if total_chunks > 0 && failed_chunks == total_chunks {
        bail!("could not look up any of the {} configured validators", ids.len());
    }

    let mut resolution = resolve_validators(specs, &records);
    let unresolved: HashSet<_> = unresolved.into_iter().collect();
    resolution.inactive.retain(|id| !unresolved.contains(id));
    log_resolution(&resolution);

    if resolution.registry.is_empty() {
        bail!(
            "none of the {} configured validators resolved to an active validator",
            ids.len()
        );
    }

    info!(
        validators = resolution.registry.len(),
        "resolved monitored validators"
    );
    Ok(resolution.registry)
}

fn log_resolution(resolution: &Resolution) {
    if !resolution.inactive.is_empty() {
        let listed: Vec<String> = resolution.inactive.iter().map(ToString::to_string).collect();
        warn!(
            count = listed.len(),
            validators = %listed.join(", "),
            "validators are not active or unknown and will not be monitored"
        );
    }

    for (index, pubkey) in &resolution.duplicates {
        warn!(
            index,
            pubkey = %pubkey.short(),
            "validator listed both by index and by pubkey; monitoring it once"
        );
    }
}

fn unique_ids(specs: &[ValidatorSpec]) -> Vec<ValidatorId> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .map(|spec| spec.id)
        .filter(|id| seen.insert(*id))
        .collect()
}

fn alias_for(specs: &[ValidatorSpec], identifier: &ValidatorIdentifier) -> Option<String> {
    specs
        .iter()
        .filter(|spec| identifier.matches_id(&spec.id))
        .find_map(|spec| spec.alias.clone())
}
