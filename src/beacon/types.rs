//! Wire types for the subset of the beacon node HTTP API the monitor consumes.

use crate::duties::types::{Epoch, PublicKeyBytes, Slot, ValidatorIndex};
use serde::{Deserialize, Serialize};

/// Integers on the beacon API are transported as decimal strings (`"123"`).
/// Unquoted numbers are accepted on decode since some clients emit them.
pub mod quoted_u64 {
    use serde::{de, Deserializer};
    use std::fmt;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(QuotedU64Visitor)
    }

    struct QuotedU64Visitor;

    impl de::Visitor<'_> for QuotedU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a quoted or unquoted integer")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse().map_err(de::Error::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }
    }
}

/// Standard `{ "data": ... }` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct GenericResponse<T> {
    pub data: T,
}

/// Envelope used by the duty endpoints, which also carry the dependent root.
#[derive(Debug, Clone, Deserialize)]
pub struct DutiesResponse<T> {
    #[serde(default)]
    pub dependent_root: Option<String>,
    #[serde(default)]
    pub execution_optimistic: Option<bool>,
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenesisData {
    #[serde(with = "quoted_u64")]
    pub genesis_time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorData {
    #[serde(with = "quoted_u64")]
    pub index: ValidatorIndex,
    pub status: String,
    pub validator: ValidatorRecord,
}

impl ValidatorData {
    /// Active statuses are `active_ongoing`, `active_exiting` and `active_slashed`.
    pub fn is_active(&self) -> bool {
        self.status.starts_with("active")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorRecord {
    pub pubkey: PublicKeyBytes,
}

/// Body of `POST /eth/v1/beacon/states/{state_id}/validators`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatorsPostRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttesterData {
    pub pubkey: PublicKeyBytes,
    #[serde(with = "quoted_u64")]
    pub validator_index: ValidatorIndex,
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposerData {
    pub pubkey: PublicKeyBytes,
    #[serde(with = "quoted_u64")]
    pub validator_index: ValidatorIndex,
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncDuty {
    pub pubkey: PublicKeyBytes,
    #[serde(with = "quoted_u64")]
    pub validator_index: ValidatorIndex,
}

/// Body of the attester and sync duty lookups: a JSON array of quoted indices.
pub fn quoted_indices(indices: &[ValidatorIndex]) -> Vec<String> {
    indices.iter().map(u64::to_string).collect()
}

/// Epoch path segment helper so request paths stay consistent.
pub(crate) fn duty_path(kind: &str, epoch: Epoch) -> String {
    format!("eth/v1/validator/duties/{kind}/{epoch}")
}
