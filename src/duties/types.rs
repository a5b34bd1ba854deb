//! Core duty records shared by the fetcher, the poll loop and the reporters.

use anyhow::{anyhow, bail, Context, Result};
use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type Slot = u64;
pub type Epoch = u64;
pub type ValidatorIndex = u64;

pub const PUBLIC_KEY_BYTES_LEN: usize = 48;

/// Compressed BLS public key as served by the beacon node API.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKeyBytes([u8; PUBLIC_KEY_BYTES_LEN]);

impl PublicKeyBytes {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_BYTES_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_BYTES_LEN] {
        &self.0
    }

    /// Abbreviated form used in log lines (`0x93ab..f1c2`).
    pub fn short(&self) -> String {
        let full = hex::encode(self.0);
        format!("0x{}..{}", &full[..4], &full[full.len() - 4..])
    }
}

impl FromStr for PublicKeyBytes {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let Some(stripped) = trimmed.strip_prefix("0x") else {
            bail!("public key {trimmed} must be 0x-prefixed");
        };
        let decoded =
            hex::decode(stripped).with_context(|| format!("public key {trimmed} is not hex"))?;
        let bytes: [u8; PUBLIC_KEY_BYTES_LEN] = decoded.try_into().map_err(|raw: Vec<u8>| {
            anyhow!(
                "public key must be {PUBLIC_KEY_BYTES_LEN} bytes, got {}",
                raw.len()
            )
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", self.short())
    }
}

impl<'de> Deserialize<'de> for PublicKeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// A validator reference as written by the operator, before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorId {
    ByIndex(ValidatorIndex),
    ByPubkey(PublicKeyBytes),
}

impl FromStr for ValidatorId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            bail!("validator identifier cannot be empty");
        }
        if trimmed.starts_with("0x") {
            return trimmed.parse().map(ValidatorId::ByPubkey);
        }
        trimmed
            .parse::<u64>()
            .map(ValidatorId::ByIndex)
            .with_context(|| {
                format!("validator identifier {trimmed} is neither an index nor a 0x pubkey")
            })
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorId::ByIndex(index) => write!(f, "{index}"),
            ValidatorId::ByPubkey(pubkey) => write!(f, "{pubkey}"),
        }
    }
}

/// One operator supplied validator entry: `<index|pubkey>[;alias]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSpec {
    pub id: ValidatorId,
    pub alias: Option<String>,
}

impl FromStr for ValidatorSpec {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let (raw_id, alias) = match value.split_once(';') {
            Some((id, alias)) => {
                let alias = alias.trim();
                (id, (!alias.is_empty()).then(|| alias.to_owned()))
            }
            None => (value, None),
        };
        Ok(Self {
            id: raw_id.parse()?,
            alias,
        })
    }
}

/// Canonical identity of a resolved validator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidatorIdentifier {
    pub index: Option<ValidatorIndex>,
    pub pubkey: PublicKeyBytes,
    pub alias: Option<String>,
}

impl ValidatorIdentifier {
    pub fn new(index: Option<ValidatorIndex>, pubkey: PublicKeyBytes) -> Self {
        Self {
            index,
            pubkey,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    /// Identifiers refer to the same validator when either the index or the pubkey matches.
    pub fn same_validator(&self, other: &ValidatorIdentifier) -> bool {
        let index_matches = matches!((self.index, other.index), (Some(a), Some(b)) if a == b);
        index_matches || self.pubkey == other.pubkey
    }

    pub fn matches_id(&self, id: &ValidatorId) -> bool {
        match id {
            ValidatorId::ByIndex(index) => self.index == Some(*index),
            ValidatorId::ByPubkey(pubkey) => self.pubkey == *pubkey,
        }
    }
}

impl fmt::Display for ValidatorIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.alias, self.index) {
            (Some(alias), _) => write!(f, "{alias}"),
            (None, Some(index)) => write!(f, "{index}"),
            (None, None) => write!(f, "{}", self.pubkey.short()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DutyType {
    Attestation,
    Proposal,
    SyncCommittee,
}

impl fmt::Display for DutyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DutyType::Attestation => "attestation",
            DutyType::Proposal => "proposal",
            DutyType::SyncCommittee => "sync committee",
        };
        f.write_str(label)
    }
}

/// Which sync-committee period a sync-committee duty belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCommitteePeriod {
    /// Member of the active committee; `slot` is where the membership ends.
    Current,
    /// Member of the upcoming committee; `slot` is where the membership starts.
    Next,
}

/// A single scheduled duty. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorDuty {
    validator: ValidatorIdentifier,
    duty_type: DutyType,
    slot: Slot,
    sync_period: Option<SyncCommitteePeriod>,
}

impl ValidatorDuty {
    pub fn attestation(validator: ValidatorIdentifier, slot: Slot) -> Self {
        Self {
            validator,
            duty_type: DutyType::Attestation,
            slot,
            sync_period: None,
        }
    }

    pub fn proposal(validator: ValidatorIdentifier, slot: Slot) -> Self {
        Self {
            validator,
            duty_type: DutyType::Proposal,
            slot,
            sync_period: None,
        }
    }

    pub fn sync_committee(
        validator: ValidatorIdentifier,
        slot: Slot,
        period: SyncCommitteePeriod,
    ) -> Self {
        Self {
            validator,
            duty_type: DutyType::SyncCommittee,
            slot,
            sync_period: Some(period),
        }
    }

    pub fn validator(&self) -> &ValidatorIdentifier {
        &self.validator
    }

    pub fn duty_type(&self) -> DutyType {
        self.duty_type
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn sync_period(&self) -> Option<SyncCommitteePeriod> {
        self.sync_period
    }

    pub fn is_sync_committee(&self) -> bool {
        self.duty_type == DutyType::SyncCommittee
    }
}

/// Result of one fetch operation: at most one duty per validator.
pub type DutyMap = BTreeMap<ValidatorIdentifier, ValidatorDuty>;

/// The sorted duties held by the poll loop between ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DutyCollection {
    duties: Vec<ValidatorDuty>,
}

impl DutyCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps duties that are already ordered by slot. Use [`crate::monitor::merge_duties`]
    /// to build a collection from unsorted fetch results.
    pub(crate) fn from_sorted(duties: Vec<ValidatorDuty>) -> Self {
        Self { duties }
    }

    pub fn is_empty(&self) -> bool {
        self.duties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.duties.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidatorDuty> {
        self.duties.iter()
    }

    pub fn as_slice(&self) -> &[ValidatorDuty] {
        &self.duties
    }
}

impl<'a> IntoIterator for &'a DutyCollection {
    type Item = &'a ValidatorDuty;
    type IntoIter = std::slice::Iter<'a, ValidatorDuty>;

    fn into_iter(self) -> Self::IntoIter {
        self.duties.iter()
    }
}
