//! Progress and cancellation hooks
//!
//! These let the engine report to a UI and be stopped from outside without
//! depending on any terminal or signal handling crate.

use crate::types::NodeReport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for execution
///
/// Always called on the thread that started the run, between waves.
pub trait ProgressCallback {
    /// Called before a wave is dispatched
    fn on_wave_start(&mut self, index: usize, ids: &[String]);

    /// Called once per node after its wave has resolved
    fn on_node_complete(&mut self, report: &NodeReport);

    /// Called after every node of a wave reached a terminal state
    fn on_wave_complete(&mut self, index: usize);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_wave_start(&mut self, _index: usize, _ids: &[String]) {}
    fn on_node_complete(&mut self, _report: &NodeReport) {}
    fn on_wave_complete(&mut self, _index: usize) {}
}

/// Run-level cancellation signal
///
/// Cancelling stops new waves from being dispatched; operations already in
/// flight run to completion and are recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
