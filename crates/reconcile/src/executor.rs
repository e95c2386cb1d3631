//! Execution engine - applies a plan wave by wave with bounded parallelism
//!
//! Nodes within a wave run on a rayon pool of `jobs` workers. A wave only
//! starts once every node of the previous wave is terminal, and RunState is
//! checkpointed after each wave so an interrupted run never loses the record
//! of a resource it already created.

use crate::context::{CancelToken, ProgressCallback};
use crate::diff::{ResourceDiff, compute_diffs};
use crate::error::{Error, Result};
use crate::graph::{ResourceGraph, ResourceNode};
use crate::planner::{ExecutionPlan, layer};
use crate::provider::{Action, Provider, ensure};
use crate::resource::ResourceKind;
use crate::retry::{LogCallback, RetryCallback, with_retry};
use crate::state::{NodeStatus, ResourceRecord, RunState, StateStore};
use crate::types::{ExecuteOptions, ExportSpec, NodeReport, RunResult};
use crate::value::{Attributes, OutputRef, resolve_properties};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

const CANCELLED: &str = "run cancelled";

/// Reconciliation engine bound to a provider and a state store
pub struct Engine<'a> {
    provider: &'a dyn Provider,
    store: &'a dyn StateStore,
    options: ExecuteOptions,
    cancel: CancelToken,
    retry_callback: &'a dyn RetryCallback,
}

impl<'a> Engine<'a> {
    pub fn new(provider: &'a dyn Provider, store: &'a dyn StateStore, options: ExecuteOptions) -> Self {
        Self {
            provider,
            store,
            options,
            cancel: CancelToken::new(),
            retry_callback: &LogCallback,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_retry_callback(mut self, callback: &'a dyn RetryCallback) -> Self {
        self.retry_callback = callback;
        self
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Compute what `apply` would do without mutating anything.
    pub fn plan(&self, graph: &ResourceGraph, plan: &ExecutionPlan) -> Result<Vec<ResourceDiff>> {
        let state = self.store.load()?;
        Ok(compute_diffs(
            graph,
            plan,
            &state,
            self.provider,
            self.options.refresh,
            self.options.prune,
        )?)
    }

    /// Converge every planned node, then prune orphans and resolve exports.
    pub fn apply<P: ProgressCallback>(
        &self,
        graph: &ResourceGraph,
        plan: &ExecutionPlan,
        exports: &[ExportSpec],
        progress: &mut P,
    ) -> Result<RunResult> {
        let state = Mutex::new(self.store.load()?);
        let pool = self.pool()?;
        let mut result = RunResult::default();
        let mut unhealthy: HashMap<String, NodeStatus> = HashMap::new();

        log::info!(
            "Applying {} resources in {} waves with {} workers via {}",
            plan.total_resources(),
            plan.waves.len(),
            self.options.jobs.max(1),
            self.provider.name()
        );

        for (index, wave) in plan.waves.iter().enumerate() {
            if self.cancel.is_cancelled() {
                result.cancelled = true;
                skip_wave(graph, wave, index, &mut result);
                continue;
            }

            progress.on_wave_start(index, wave);

            let (blocked, ready): (Vec<&String>, Vec<&String>) = wave.iter().partition(|id| {
                graph
                    .get(id)
                    .is_some_and(|n| n.dependency_ids.iter().any(|d| unhealthy.contains_key(d)))
            });

            let mut reports: Vec<NodeReport> = blocked
                .into_iter()
                .filter_map(|id| graph.get(id))
                .map(|node| self.block(node, index, &unhealthy, &state))
                .collect();

            let applied: Vec<NodeReport> = pool.install(|| {
                ready
                    .par_iter()
                    .filter_map(|id| graph.get(id))
                    .map(|node| self.apply_node(node, index, &state))
                    .collect()
            });
            reports.extend(applied);

            for report in reports {
                if !report.status.is_success() {
                    unhealthy.insert(report.id.clone(), report.status);
                }
                progress.on_node_complete(&report);
                result.nodes.insert(report.id.clone(), report);
            }

            self.checkpoint(&state)?;
            progress.on_wave_complete(index);
            result.waves.push(wave.clone());
        }

        if self.options.prune && !plan.targeted && !result.cancelled {
            let orphans: BTreeSet<String> = lock(&state)
                .resources
                .keys()
                .filter(|id| !graph.contains(id))
                .cloned()
                .collect();
            if !orphans.is_empty() {
                log::info!("Pruning {} resources no longer declared", orphans.len());
                self.delete_all(&orphans, &state, &pool, &mut result, progress)?;
            }
        }

        {
            let mut state = lock(&state);
            result.exports = resolve_exports(&state, &result, exports, plan.targeted);
            state.exports.clone_from(&result.exports);
        }
        self.checkpoint(&state)?;

        let summary = result.summary();
        log::info!(
            "Run finished: {} applied, {} unchanged, {} failed, {} blocked, {} deleted",
            summary.applied,
            summary.unchanged,
            summary.failed,
            summary.blocked,
            summary.deleted
        );
        Ok(result)
    }

    /// Delete every resource recorded in RunState, dependents first.
    pub fn destroy<P: ProgressCallback>(&self, progress: &mut P) -> Result<RunResult> {
        let state = Mutex::new(self.store.load()?);
        let pool = self.pool()?;
        let mut result = RunResult::default();

        let ids: BTreeSet<String> = lock(&state).resources.keys().cloned().collect();
        log::info!("Destroying {} resources via {}", ids.len(), self.provider.name());
        self.delete_all(&ids, &state, &pool, &mut result, progress)?;

        if result.is_success() {
            lock(&state).exports.clear();
        }
        self.checkpoint(&state)?;
        Ok(result)
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .thread_name(|i| format!("reconcile-worker-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))
    }

    fn checkpoint(&self, state: &Mutex<RunState>) -> Result<()> {
        let mut state = lock(state);
        state.touch();
        self.store.save(&state)?;
        Ok(())
    }

    /// Record a node whose dependency did not reach its desired state.
    fn block(
        &self,
        node: &ResourceNode,
        wave: usize,
        unhealthy: &HashMap<String, NodeStatus>,
        state: &Mutex<RunState>,
    ) -> NodeReport {
        let reason = node
            .dependency_ids
            .iter()
            .find_map(|d| unhealthy.get(d).map(|status| format!("dependency '{d}' {status}")))
            .unwrap_or_else(|| "dependency not applied".to_string());
        log::warn!("{}: blocked, {reason}", node.id);

        record_failure(&mut lock(state), node, NodeStatus::Blocked, &reason);
        NodeReport {
            id: node.id.clone(),
            kind: node.kind,
            status: NodeStatus::Blocked,
            action: None,
            attempts: 0,
            error: Some(reason),
            wave,
        }
    }

    fn apply_node(&self, node: &ResourceNode, wave: usize, state: &Mutex<RunState>) -> NodeReport {
        let mut report = NodeReport {
            id: node.id.clone(),
            kind: node.kind,
            status: NodeStatus::Failed,
            action: None,
            attempts: 0,
            error: None,
            wave,
        };

        let (previous, desired) = {
            let state = lock(state);
            let desired = resolve_properties(&node.desired_properties, &|r: &OutputRef| state.output(r));
            (state.record(&node.id).cloned(), desired)
        };

        let desired = match desired {
            Ok(desired) => desired,
            Err(e) => {
                let reason = format!("unresolved input: {e}");
                log::error!("{}: {reason}", node.id);
                record_failure(&mut lock(state), node, NodeStatus::Failed, &reason);
                report.error = Some(reason);
                return report;
            }
        };

        if !self.options.refresh
            && let Some(prev) = previous.as_ref().filter(|p| p.is_settled() && p.properties == desired)
        {
            log::debug!("{}: unchanged since last run", node.id);
            let outputs = prev.outputs.clone();
            record_success(&mut lock(state), node, NodeStatus::Unchanged, desired, outputs);
            report.status = NodeStatus::Unchanged;
            report.action = Some(Action::NoOp);
            return report;
        }

        let outcome = match self.provider.validate(node.kind, &node.id, &desired) {
            Ok(()) => with_retry(&self.options.retry, &node.id, self.retry_callback, |_| {
                ensure(self.provider, node.kind, &node.id, &desired)
            }),
            Err(e) => {
                log::error!("{}: rejected before apply: {e}", node.id);
                record_failure(&mut lock(state), node, NodeStatus::Failed, &e.to_string());
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.attempts = outcome.attempts;

        match outcome.result {
            Ok((action, outputs)) => {
                let status = if action == Action::NoOp {
                    NodeStatus::Unchanged
                } else {
                    NodeStatus::Applied
                };
                log::info!("{}: {action} ({} attempts)", node.id, outcome.attempts);
                record_success(&mut lock(state), node, status, desired, outputs);
                report.status = status;
                report.action = Some(action);
            }
            Err(e) => {
                log::error!("{}: {e} after {} attempts", node.id, outcome.attempts);
                record_failure(&mut lock(state), node, NodeStatus::Failed, &e.to_string());
                report.error = Some(e.to_string());
            }
        }
        report
    }

    /// Delete resources in reverse dependency order.
    ///
    /// A resource is kept if anything depending on it could not be deleted.
    fn delete_all<P: ProgressCallback>(
        &self,
        ids: &BTreeSet<String>,
        state: &Mutex<RunState>,
        pool: &rayon::ThreadPool,
        result: &mut RunResult,
        progress: &mut P,
    ) -> Result<()> {
        let (deps, kinds) = {
            let state = lock(state);
            let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            let mut kinds = HashMap::new();
            for id in ids {
                if let Some(record) = state.record(id) {
                    let inside = record.dependencies.intersection(ids).cloned().collect();
                    deps.insert(id.clone(), inside);
                    kinds.insert(id.clone(), record.kind);
                }
            }
            (deps, kinds)
        };

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (id, ds) in &deps {
            for d in ds {
                dependents.entry(d.as_str()).or_default().push(id.as_str());
            }
        }

        let mut kept: HashMap<String, NodeStatus> = HashMap::new();
        for wave in layer(&deps).into_iter().rev() {
            let index = result.waves.len();
            if self.cancel.is_cancelled() {
                result.cancelled = true;
                for id in &wave {
                    if let Some(kind) = kinds.get(id) {
                        result.nodes.insert(id.clone(), cancelled_report(id, *kind, index));
                    }
                }
                result.waves.push(wave);
                continue;
            }

            progress.on_wave_start(index, &wave);

            let (blocked, ready): (Vec<&String>, Vec<&String>) = wave.iter().partition(|id| {
                dependents
                    .get(id.as_str())
                    .is_some_and(|ds| ds.iter().any(|d| kept.contains_key(*d)))
            });

            let mut reports: Vec<NodeReport> = blocked
                .into_iter()
                .filter_map(|id| kinds.get(id).map(|k| (id, *k)))
                .map(|(id, kind)| NodeReport {
                    id: id.clone(),
                    kind,
                    status: NodeStatus::Blocked,
                    action: Some(Action::Delete),
                    attempts: 0,
                    error: Some("a dependent resource could not be deleted".to_string()),
                    wave: index,
                })
                .collect();

            let deleted: Vec<NodeReport> = pool.install(|| {
                ready
                    .par_iter()
                    .filter_map(|id| kinds.get(*id).map(|k| (*id, *k)))
                    .map(|(id, kind)| self.delete_node(id, kind, index, state))
                    .collect()
            });
            reports.extend(deleted);

            for report in reports {
                if !report.status.is_success() {
                    kept.insert(report.id.clone(), report.status);
                }
                progress.on_node_complete(&report);
                result.nodes.insert(report.id.clone(), report);
            }

            self.checkpoint(state)?;
            progress.on_wave_complete(index);
            result.waves.push(wave);
        }
        Ok(())
    }

    fn delete_node(
        &self,
        id: &str,
        kind: ResourceKind,
        wave: usize,
        state: &Mutex<RunState>,
    ) -> NodeReport {
        let outcome = with_retry(&self.options.retry, id, self.retry_callback, |_| {
            self.provider.delete(kind, id)
        });

        let mut report = NodeReport {
            id: id.to_string(),
            kind,
            status: NodeStatus::Deleted,
            action: Some(Action::Delete),
            attempts: outcome.attempts,
            error: None,
            wave,
        };

        let mut state = lock(state);
        match outcome.result {
            Ok(()) => {
                log::info!("{id}: deleted");
                state.resources.remove(id);
            }
            Err(e) => {
                log::error!("{id}: delete failed: {e}");
                if let Some(record) = state.resources.get_mut(id) {
                    record.status = NodeStatus::Failed;
                    record.error = Some(e.to_string());
                    record.updated_at = Utc::now();
                }
                report.status = NodeStatus::Failed;
                report.error = Some(e.to_string());
            }
        }
        report
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn record_success(
    state: &mut RunState,
    node: &ResourceNode,
    status: NodeStatus,
    properties: Attributes,
    outputs: Attributes,
) {
    state.resources.insert(
        node.id.clone(),
        ResourceRecord {
            kind: node.kind,
            properties,
            outputs,
            dependencies: node.dependency_ids.clone(),
            status,
            error: None,
            updated_at: Utc::now(),
        },
    );
}

/// Mark a node as failed or blocked, keeping what was last applied.
fn record_failure(state: &mut RunState, node: &ResourceNode, status: NodeStatus, reason: &str) {
    let previous = state.resources.remove(&node.id);
    let (properties, outputs) = previous
        .map(|p| (p.properties, p.outputs))
        .unwrap_or_default();
    state.resources.insert(
        node.id.clone(),
        ResourceRecord {
            kind: node.kind,
            properties,
            outputs,
            dependencies: node.dependency_ids.clone(),
            status,
            error: Some(reason.to_string()),
            updated_at: Utc::now(),
        },
    );
}

fn cancelled_report(id: &str, kind: ResourceKind, wave: usize) -> NodeReport {
    NodeReport {
        id: id.to_string(),
        kind,
        status: NodeStatus::Blocked,
        action: None,
        attempts: 0,
        error: Some(CANCELLED.to_string()),
        wave,
    }
}

fn skip_wave(graph: &ResourceGraph, wave: &[String], index: usize, result: &mut RunResult) {
    for node in wave.iter().filter_map(|id| graph.get(id)) {
        result
            .nodes
            .insert(node.id.clone(), cancelled_report(&node.id, node.kind, index));
    }
    result.waves.push(wave.to_vec());
}

/// Exports from this run, falling back to the last known value for exports
/// whose source did not succeed.
fn resolve_exports(
    state: &RunState,
    result: &RunResult,
    exports: &[ExportSpec],
    targeted: bool,
) -> BTreeMap<String, serde_json::Value> {
    let mut resolved = if targeted {
        state.exports.clone()
    } else {
        BTreeMap::new()
    };

    for export in exports {
        let fresh = result
            .status_of(&export.from.resource)
            .filter(NodeStatus::is_success)
            .and_then(|_| state.output(&export.from));
        match fresh.or_else(|| state.exports.get(&export.name).cloned()) {
            Some(value) => {
                resolved.insert(export.name.clone(), value);
            }
            None => log::warn!("Export '{}' has no value ({})", export.name, export.from),
        }
    }
    resolved
}
