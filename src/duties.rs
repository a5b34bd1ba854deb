//! Duty records and the beacon node lookups that produce them.

pub mod fetcher;
pub mod identifier;
pub mod types;

pub use fetcher::{DutyFetcher, DutySource};
pub use identifier::{resolve_validators, Resolution, ValidatorRegistry};
pub use types::{
    DutyCollection, DutyMap, DutyType, PublicKeyBytes, Slot, SyncCommitteePeriod, ValidatorDuty,
    ValidatorId, ValidatorIdentifier, ValidatorSpec,
};
