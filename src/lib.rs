pub mod beacon;
pub mod duties;
pub mod monitor;
pub mod runtime;

pub use beacon::{ApiMetricsSnapshot, BeaconApiError, BeaconClientOptions, BeaconNodeClient};
pub use duties::{
    DutyCollection, DutyFetcher, DutyMap, DutySource, DutyType, SyncCommitteePeriod,
    ValidatorDuty, ValidatorId, ValidatorIdentifier, ValidatorRegistry, ValidatorSpec,
};
pub use monitor::{
    format_remaining, is_stale, merge_duties, spawn_signal_listener, DutyReporter, DutySnapshot,
    GracefulTerminator, LogReporter, LoopState, PollLoop, RunOutcome, Termination,
};
pub use runtime::clock::{ChainTiming, ManualSlotClock, SlotClock, SystemSlotClock};
pub use runtime::config::{
    parse_validator_lines, read_validator_file, split_validator_list, MonitorConfig,
    MonitorConfigBuilder, MonitorConfigParams, OperatingMode,
};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
