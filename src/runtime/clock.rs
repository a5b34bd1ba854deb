//! Wall-clock to slot conversion.
//!
//! The beacon chain divides time into fixed-length slots starting at genesis. Every
//! component that needs "the current slot" goes through a [`SlotClock`] so tests can
//! drive time explicitly with [`ManualSlotClock`].

use crate::duties::types::{Epoch, Slot};
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAINNET_SECONDS_PER_SLOT: u64 = 12;
const MAINNET_SLOTS_PER_EPOCH: u64 = 32;
const MAINNET_EPOCHS_PER_SYNC_COMMITTEE_PERIOD: u64 = 256;

/// Fixed timing parameters of the monitored network. Defaults to mainnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTiming {
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
    pub epochs_per_sync_committee_period: u64,
}

impl Default for ChainTiming {
    fn default() -> Self {
        Self {
            seconds_per_slot: MAINNET_SECONDS_PER_SLOT,
            slots_per_epoch: MAINNET_SLOTS_PER_EPOCH,
            epochs_per_sync_committee_period: MAINNET_EPOCHS_PER_SYNC_COMMITTEE_PERIOD,
        }
    }
}

impl ChainTiming {
    pub fn validate(&self) -> Result<()> {
        if self.seconds_per_slot == 0 {
            bail!("seconds_per_slot must be greater than 0");
        }
        if self.slots_per_epoch == 0 {
            bail!("slots_per_epoch must be greater than 0");
        }
        if self.epochs_per_sync_committee_period == 0 {
            bail!("epochs_per_sync_committee_period must be greater than 0");
        }
        Ok(())
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot)
    }

    pub fn epoch_of(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    pub fn first_slot_of(&self, epoch: Epoch) -> Slot {
        epoch.saturating_mul(self.slots_per_epoch)
    }

    pub fn sync_committee_period_of(&self, epoch: Epoch) -> u64 {
        epoch / self.epochs_per_sync_committee_period
    }

    /// First epoch of the sync-committee period following the one containing `epoch`.
    pub fn next_sync_committee_period_start(&self, epoch: Epoch) -> Epoch {
        self.sync_committee_period_of(epoch)
            .saturating_add(1)
            .saturating_mul(self.epochs_per_sync_committee_period)
    }
}

/// A clock that reports the current slot.
pub trait SlotClock: Send + Sync + Clone + 'static {
    /// Present time as a duration since the UNIX epoch.
    fn now_duration(&self) -> Duration;

    /// Genesis time as a duration since the UNIX epoch.
    fn genesis(&self) -> Duration;

    fn timing(&self) -> ChainTiming;

    /// Slot containing `now`, or `None` before genesis.
    fn slot_of(&self, now: Duration) -> Option<Slot> {
        let since_genesis = now.checked_sub(self.genesis())?;
        Some(since_genesis.as_secs() / self.timing().seconds_per_slot)
    }

    /// Current slot; slot 0 is reported until genesis has happened.
    fn current_slot(&self) -> Slot {
        self.slot_of(self.now_duration()).unwrap_or(0)
    }

    fn start_of(&self, slot: Slot) -> Duration {
        self.genesis()
            .saturating_add(self.timing().slot_duration().saturating_mul(clamp_u32(slot)))
    }

    /// Time left until `slot` starts, `None` once it has started.
    fn duration_to_slot(&self, slot: Slot) -> Option<Duration> {
        self.start_of(slot).checked_sub(self.now_duration())
    }
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u64::from(u32::MAX)) as u32
}

/// Slot clock backed by the system time.
#[derive(Debug, Clone)]
pub struct SystemSlotClock {
    genesis: Duration,
    timing: ChainTiming,
}

impl SystemSlotClock {
    pub fn new(genesis_time: u64, timing: ChainTiming) -> Self {
        Self {
            genesis: Duration::from_secs(genesis_time),
            timing,
        }
    }
}

impl SlotClock for SystemSlotClock {
    fn now_duration(&self) -> Duration {
        // A clock set before 1970 is treated as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }

    fn genesis(&self) -> Duration {
        self.genesis
    }

    fn timing(&self) -> ChainTiming {
        self.timing
    }
}

/// Slot clock whose time only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualSlotClock {
    genesis: Duration,
    timing: ChainTiming,
    now_millis: Arc<AtomicU64>,
}

impl ManualSlotClock {
    pub fn new(genesis_time: u64, timing: ChainTiming) -> Self {
        Self {
            genesis: Duration::from_secs(genesis_time),
            timing,
            now_millis: Arc::new(AtomicU64::new(genesis_time.saturating_mul(1_000))),
        }
    }

    pub fn set_now(&self, now: Duration) {
        let millis = now.as_millis().min(u128::from(u64::MAX)) as u64;
        self.now_millis.store(millis, Ordering::SeqCst);
    }

    pub fn set_slot(&self, slot: Slot) {
        self.set_now(self.start_of(slot));
    }

    pub fn advance(&self, by: Duration) {
        let millis = by.as_millis().min(u128::from(u64::MAX)) as u64;
        self.now_millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl SlotClock for ManualSlotClock {
    fn now_duration(&self) -> Duration {
        Duration::from_millis(self.now_millis.load(Ordering::SeqCst))
    }

    fn genesis(&self) -> Duration {
        self.genesis
    }

    fn timing(&self) -> ChainTiming {
        self.timing
    }
}
