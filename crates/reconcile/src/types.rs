//! Core types for run options and results

use crate::provider::Action;
use crate::resource::ResourceKind;
use crate::retry::RetryPolicy;
use crate::state::NodeStatus;
use crate::value::OutputRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one node in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: String,
    pub kind: ResourceKind,
    pub status: NodeStatus,
    /// What was done to the resource, if anything was attempted
    pub action: Option<Action>,
    /// Provider attempts made, including retries
    pub attempts: u32,
    /// Failure cause, or the reason a node was blocked
    pub error: Option<String>,
    pub wave: usize,
}

/// Summary of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    /// Waves in the order they were executed
    pub waves: Vec<Vec<String>>,
    pub nodes: BTreeMap<String, NodeReport>,
    /// Named outputs resolved at the end of the run
    pub exports: BTreeMap<String, serde_json::Value>,
    /// Whether the run stopped early because of cancellation
    pub cancelled: bool,
}

impl RunResult {
    /// Every node reached its desired state and the run was not cancelled
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.nodes.values().all(|n| n.status.is_success())
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for node in self.nodes.values() {
            summary.add(node.status);
        }
        summary
    }
}

/// Per-status counts of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub blocked: usize,
    pub deleted: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.applied + self.deleted
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0
    }

    pub fn total(&self) -> usize {
        self.applied + self.unchanged + self.failed + self.blocked + self.deleted
    }

    pub fn add(&mut self, status: NodeStatus) {
        match status {
            NodeStatus::Applied => self.applied += 1,
            NodeStatus::Unchanged => self.unchanged += 1,
            NodeStatus::Failed => self.failed += 1,
            NodeStatus::Blocked => self.blocked += 1,
            NodeStatus::Deleted => self.deleted += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of parallel workers per wave
    pub jobs: usize,
    /// Ask the provider for actual state even when RunState is up to date
    pub refresh: bool,
    /// Delete resources that are in RunState but no longer declared
    pub prune: bool,
    pub retry: RetryPolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            refresh: false,
            prune: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// A named output exported from a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSpec {
    pub name: String,
    pub from: OutputRef,
}

impl ExportSpec {
    pub fn new(name: impl Into<String>, resource: &str, attribute: &str) -> Self {
        Self {
            name: name.into(),
            from: OutputRef::new(resource, attribute),
        }
    }
}
