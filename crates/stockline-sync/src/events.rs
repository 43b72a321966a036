//! Engine events for the UI collaborator.
//!
//! The engine never blocks on an emitter: implementations should hand the
//! event off (a channel, a platform bridge) and return.

use stockline_core::{Mutation, PassReport, SyncStatus};

/// Receives status changes, pass results and terminal failures.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits the outcome of a finished pass.
    fn emit_pass(&self, report: &PassReport);

    /// A mutation failed terminally and now waits for the operator.
    fn emit_mutation_failed(&self, mutation: &Mutation, reason: &str);

    /// Emits an engine-level error (storage failure, scheduler problem).
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_pass(&self, _report: &PassReport) {}
    fn emit_mutation_failed(&self, _mutation: &Mutation, _reason: &str) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}
