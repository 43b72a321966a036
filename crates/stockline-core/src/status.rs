//! Connectivity and derived sync status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Whether the device currently believes it can reach the network.
///
/// Observational only: the engine never refuses a command because of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ConnectivityState {
    Online,
    #[default]
    Offline,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

/// Kind of network link reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum NetworkKind {
    Wifi,
    Cellular,
    Ethernet,
    Other,
    #[default]
    None,
}

/// Aggregate sync status, derived from the mutation log on every read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatus {
    /// Queue depth: Pending plus InFlight mutations.
    pub pending_count: u64,

    /// Mutations that failed terminally and await the operator.
    pub failed_count: u64,

    /// Newest `synced_at` in the mutation log.
    #[ts(as = "Option<String>")]
    pub last_sync: Option<DateTime<Utc>>,

    /// A pass is draining right now.
    pub in_progress: bool,

    pub connectivity: ConnectivityState,
}

impl SyncStatus {
    /// Nothing left to send and nothing awaiting the operator.
    pub fn is_idle_and_clean(&self) -> bool {
        !self.in_progress && self.pending_count == 0 && self.failed_count == 0
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PassReport {
    /// Acknowledged by the remote and marked synced.
    pub processed: u32,

    /// Failed terminally during this pass.
    pub failed: u32,

    /// Left pending after a retryable error (or behind one with the same
    /// ordering key).
    pub deferred: u32,

    /// The pass stopped early because it was cancelled.
    pub cancelled: bool,
}

impl PassReport {
    /// Items the pass looked at.
    pub fn total(&self) -> u32 {
        self.processed + self.failed + self.deferred
    }

    /// The scheduler should come back after a backoff delay.
    pub fn needs_retry(&self) -> bool {
        self.deferred > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_report_totals() {
        let report = PassReport {
            processed: 4,
            failed: 1,
            deferred: 0,
            cancelled: false,
        };
        assert_eq!(report.total(), 5);
        assert!(!report.needs_retry());
    }

    #[test]
    fn test_default_status_is_offline() {
        let status = SyncStatus::default();
        assert!(!status.connectivity.is_online());
        assert!(status.is_idle_and_clean());
    }
}
