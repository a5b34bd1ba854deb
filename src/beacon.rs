//! Beacon node REST client plumbing: wire types, retry policy, request metrics.

pub mod client;
pub mod metrics;
pub mod options;
pub(crate) mod retry;
pub mod types;

pub use client::{BeaconApiError, BeaconNodeClient};
pub use metrics::ApiMetricsSnapshot;
pub use options::BeaconClientOptions;
