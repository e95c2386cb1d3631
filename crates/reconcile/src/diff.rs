//! Diff computation between desired graph and recorded/actual state

use crate::error::ProviderError;
use crate::graph::ResourceGraph;
use crate::planner::ExecutionPlan;
use crate::provider::{Action, Provider, changed_keys, satisfies};
use crate::resource::ResourceKind;
use crate::state::RunState;
use crate::value::{Attributes, OutputRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Planned change for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub id: String,
    pub kind: ResourceKind,
    pub action: Action,
    /// Wave the resource runs in; `None` for deletions of orphans
    pub wave: Option<usize>,
    /// Desired values known at plan time
    pub desired: Attributes,
    /// Properties whose value depends on outputs not known until apply
    pub pending: Vec<String>,
    /// Properties that differ from the recorded or actual state
    pub changed: Vec<String>,
    /// The resource already matches, but its RunState record is missing,
    /// failed, blocked or outdated and will be rewritten by apply
    #[serde(default)]
    pub stale: bool,
}

impl ResourceDiff {
    pub fn is_addition(&self) -> bool {
        self.action == Action::Create
    }

    pub fn is_removal(&self) -> bool {
        self.action == Action::Delete
    }

    pub fn is_modification(&self) -> bool {
        self.action == Action::Update
    }

    pub fn has_change(&self) -> bool {
        self.action != Action::NoOp
    }

    /// Whether apply would do anything for this resource, including
    /// rewriting its state record
    pub fn needs_apply(&self) -> bool {
        self.has_change() || self.stale
    }
}

/// Outputs of an upstream node that cannot be known before apply
enum Unknown {
    /// The node is created, so none of its outputs exist yet
    All,
    /// The node is updated; these property keys change, along with any
    /// output the provider computes rather than echoes
    Changed(HashSet<String>),
}

/// Compute the diff of every planned node, plus deletions of orphans.
///
/// Recorded state is trusted for settled resources whose properties did not
/// change; everything else is read from the provider. Outputs of resources
/// that are about to be created, and changed or computed outputs of
/// resources about to be updated, are reported as pending.
pub fn compute_diffs(
    graph: &ResourceGraph,
    plan: &ExecutionPlan,
    state: &RunState,
    provider: &dyn Provider,
    refresh: bool,
    prune: bool,
) -> Result<Vec<ResourceDiff>, ProviderError> {
    let mut diffs = Vec::with_capacity(plan.total_resources());
    let mut unknown: HashMap<String, Unknown> = HashMap::new();

    for (wave, ids) in plan.waves.iter().enumerate() {
        for id in ids {
            let Some(node) = graph.get(id) else { continue };

            let lookup = |r: &OutputRef| match unknown.get(&r.resource) {
                Some(Unknown::All) => None,
                Some(Unknown::Changed(keys))
                    if keys.contains(&r.attribute)
                        || !graph
                            .get(&r.resource)
                            .is_some_and(|n| n.desired_properties.contains_key(&r.attribute)) =>
                {
                    None
                }
                _ => state.output(r),
            };
            let mut desired = Attributes::new();
            let mut pending = Vec::new();
            for (key, value) in &node.desired_properties {
                match value.resolve(&lookup) {
                    Ok(v) => {
                        desired.insert(key.clone(), v);
                    }
                    Err(_) => pending.push(key.clone()),
                }
            }

            let recorded = state
                .record(id)
                .filter(|r| !refresh && r.is_settled() && pending.is_empty());
            let (action, changed) = match recorded {
                Some(rec) if rec.properties == desired => (Action::NoOp, Vec::new()),
                _ => match provider.read(node.kind, id)? {
                    None => (Action::Create, desired.keys().chain(&pending).cloned().collect()),
                    Some(observed) if pending.is_empty() && satisfies(&observed.properties, &desired) => {
                        (Action::NoOp, Vec::new())
                    }
                    Some(observed) => {
                        let mut keys = changed_keys(&observed.properties, &desired);
                        keys.extend(pending.iter().cloned());
                        (Action::Update, keys)
                    }
                },
            };

            match action {
                Action::Create => {
                    unknown.insert(id.clone(), Unknown::All);
                }
                Action::Update => {
                    unknown.insert(id.clone(), Unknown::Changed(changed.iter().cloned().collect()));
                }
                Action::NoOp | Action::Delete => {}
            }
            let stale = action == Action::NoOp
                && !state
                    .record(id)
                    .is_some_and(|r| r.is_settled() && r.properties == desired);
            log::debug!("{id}: {action}{}", if stale { " (record stale)" } else { "" });

            diffs.push(ResourceDiff {
                id: id.clone(),
                kind: node.kind,
                action,
                wave: Some(wave),
                desired,
                pending,
                changed,
                stale,
            });
        }
    }

    if prune && !plan.targeted {
        for (id, record) in &state.resources {
            if graph.contains(id) {
                continue;
            }
            diffs.push(ResourceDiff {
                id: id.clone(),
                kind: record.kind,
                action: Action::Delete,
                wave: None,
                desired: Attributes::new(),
                pending: Vec::new(),
                changed: record.properties.keys().cloned().collect(),
                stale: false,
            });
        }
    }

    Ok(diffs)
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub additions: usize,
    pub modifications: usize,
    pub removals: usize,
    pub unchanged: usize,
    /// Unchanged resources whose state record apply will rewrite
    pub stale: usize,
}

impl DiffSummary {
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            match diff.action {
                Action::Create => summary.additions += 1,
                Action::Update => summary.modifications += 1,
                Action::Delete => summary.removals += 1,
                Action::NoOp => summary.unchanged += 1,
            }
            if diff.stale {
                summary.stale += 1;
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }

    /// Changes to resources or to recorded state
    pub fn needs_apply(&self) -> bool {
        self.has_changes() || self.stale > 0
    }
}

/// Group diffs by resource kind
pub fn group_by_kind(diffs: &[ResourceDiff]) -> BTreeMap<ResourceKind, Vec<&ResourceDiff>> {
    let mut groups: BTreeMap<ResourceKind, Vec<&ResourceDiff>> = BTreeMap::new();
    for diff in diffs {
        groups.entry(diff.kind).or_default().push(diff);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BuildConfig, GraphBuilder};
    use crate::context::NoProgress;
    use crate::executor::Engine;
    use crate::memory::{MemoryProvider, MemoryStore};
    use crate::retry::RetryPolicy;
    use crate::state::StateStore;
    use crate::types::ExecuteOptions;
    use crate::resource::ResourceDescriptor;
    use crate::state::{NodeStatus, ResourceRecord};
    use crate::value::Value;
    use chrono::Utc;
    use serde_json::json;

    fn graph() -> ResourceGraph {
        GraphBuilder::new(BuildConfig::new())
            .build(vec![
                ResourceDescriptor::new(ResourceKind::Project, "hub")
                    .property("project_id", "hub-1")
                    .property("name", "Hub"),
                ResourceDescriptor::new(ResourceKind::ServiceAccount, "sa")
                    .property("project", Value::output("hub", "project_id"))
                    .property("account_id", "ci"),
            ])
            .unwrap()
    }

    fn settled(kind: ResourceKind, properties: Attributes) -> ResourceRecord {
        ResourceRecord {
            kind,
            outputs: properties.clone(),
            properties,
            dependencies: Default::default(),
            status: NodeStatus::Applied,
            error: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_state_creates_everything_with_pending_outputs() {
        let graph = graph();
        let plan = ExecutionPlan::new(&graph);
        let diffs =
            compute_diffs(&graph, &plan, &RunState::default(), &MemoryProvider::new(), false, true)
                .unwrap();

        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(ResourceDiff::is_addition));
        let sa = diffs.iter().find(|d| d.id == "sa").unwrap();
        assert_eq!(sa.pending, ["project"]);
        assert_eq!(sa.wave, Some(1));
    }

    #[test]
    fn test_settled_state_is_no_change_without_provider_reads() {
        let graph = graph();
        let plan = ExecutionPlan::new(&graph);
        let mut state = RunState::default();
        state.resources.insert(
            "hub".into(),
            settled(
                ResourceKind::Project,
                Attributes::from([
                    ("name".into(), json!("Hub")),
                    ("project_id".into(), json!("hub-1")),
                ]),
            ),
        );
        state.resources.insert(
            "sa".into(),
            settled(
                ResourceKind::ServiceAccount,
                Attributes::from([
                    ("account_id".into(), json!("ci")),
                    ("project".into(), json!("hub-1")),
                ]),
            ),
        );

        // Provider is empty, so any read would report a create.
        let diffs = compute_diffs(&graph, &plan, &state, &MemoryProvider::new(), false, true).unwrap();
        assert!(!DiffSummary::from_diffs(&diffs).has_changes());

        let refreshed = compute_diffs(&graph, &plan, &state, &MemoryProvider::new(), true, true).unwrap();
        assert_eq!(DiffSummary::from_diffs(&refreshed).additions, 2);
    }

    #[test]
    fn test_drift_reports_changed_keys() {
        let graph = graph();
        let plan = ExecutionPlan::for_target(&graph, Some("hub"));
        let provider = MemoryProvider::new();
        provider.seed(
            ResourceKind::Project,
            "hub",
            Attributes::from([
                ("name".into(), json!("Old")),
                ("project_id".into(), json!("hub-1")),
            ]),
        );

        let diffs = compute_diffs(&graph, &plan, &RunState::default(), &provider, false, true).unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].is_modification());
        assert_eq!(diffs[0].changed, ["name"]);
    }

    #[test]
    fn test_orphans_become_deletions_unless_targeted() {
        let graph = graph();
        let mut state = RunState::default();
        state
            .resources
            .insert("legacy".into(), settled(ResourceKind::Service, Attributes::new()));

        let full = ExecutionPlan::new(&graph);
        let diffs = compute_diffs(&graph, &full, &state, &MemoryProvider::new(), false, true).unwrap();
        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(summary.removals, 1);
        assert_eq!(group_by_kind(&diffs)[&ResourceKind::Service].len(), 1);

        let targeted = ExecutionPlan::for_target(&graph, Some("hub"));
        let diffs = compute_diffs(&graph, &targeted, &state, &MemoryProvider::new(), false, true).unwrap();
        assert_eq!(DiffSummary::from_diffs(&diffs).removals, 0);

        let diffs = compute_diffs(&graph, &full, &state, &MemoryProvider::new(), false, false).unwrap();
        assert_eq!(DiffSummary::from_diffs(&diffs).removals, 0);
    }

    fn apply(graph: &ResourceGraph, provider: &MemoryProvider, store: &MemoryStore) -> RunState {
        let plan = ExecutionPlan::new(graph);
        let options = ExecuteOptions {
            jobs: 1,
            retry: RetryPolicy::no_retry(),
            ..ExecuteOptions::default()
        };
        Engine::new(provider, store, options)
            .apply(graph, &plan, &[], &mut NoProgress)
            .unwrap();
        store.load().unwrap()
    }

    fn with_project_id(project_id: &str) -> ResourceGraph {
        GraphBuilder::new(BuildConfig::new())
            .build(vec![
                ResourceDescriptor::new(ResourceKind::Project, "hub")
                    .property("project_id", project_id)
                    .property("name", "Hub"),
                ResourceDescriptor::new(ResourceKind::ServiceAccount, "sa")
                    .property("project", Value::output("hub", "project_id"))
                    .property("account_id", "ci"),
            ])
            .unwrap()
    }

    #[test]
    fn test_changed_upstream_output_is_pending_for_dependents() {
        let provider = MemoryProvider::new();
        let store = MemoryStore::new();
        let state = apply(&with_project_id("hub-a"), &provider, &store);

        let graph = with_project_id("hub-b");
        let plan = ExecutionPlan::new(&graph);
        let diffs = compute_diffs(&graph, &plan, &state, &provider, false, true).unwrap();

        let hub = diffs.iter().find(|d| d.id == "hub").unwrap();
        assert!(hub.is_modification());
        assert_eq!(hub.changed, ["project_id"]);

        let sa = diffs.iter().find(|d| d.id == "sa").unwrap();
        assert!(sa.is_modification());
        assert_eq!(sa.pending, ["project"]);
        assert_eq!(DiffSummary::from_diffs(&diffs).modifications, 2);

        let result = Engine::new(&provider, &store, ExecuteOptions::default())
            .apply(&graph, &plan, &[], &mut NoProgress)
            .unwrap();
        assert_eq!(result.nodes["sa"].action, Some(Action::Update));
    }

    #[test]
    fn test_unrelated_upstream_update_keeps_dependents_unchanged() {
        let provider = MemoryProvider::new();
        let store = MemoryStore::new();
        let state = apply(&with_project_id("hub-a"), &provider, &store);

        let graph = GraphBuilder::new(BuildConfig::new())
            .build(vec![
                ResourceDescriptor::new(ResourceKind::Project, "hub")
                    .property("project_id", "hub-a")
                    .property("name", "Renamed hub"),
                ResourceDescriptor::new(ResourceKind::ServiceAccount, "sa")
                    .property("project", Value::output("hub", "project_id"))
                    .property("account_id", "ci"),
            ])
            .unwrap();
        let plan = ExecutionPlan::new(&graph);
        let diffs = compute_diffs(&graph, &plan, &state, &provider, false, true).unwrap();

        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(summary.modifications, 1);
        assert_eq!(summary.unchanged, 1);
    }

    #[test]
    fn test_unsettled_record_is_stale_even_when_resource_matches() {
        let graph = graph();
        let plan = ExecutionPlan::for_target(&graph, Some("hub"));
        let properties = Attributes::from([
            ("name".into(), json!("Hub")),
            ("project_id".into(), json!("hub-1")),
        ]);
        let provider = MemoryProvider::new();
        provider.seed(ResourceKind::Project, "hub", properties.clone());

        let mut state = RunState::default();
        let mut record = settled(ResourceKind::Project, properties);
        record.status = NodeStatus::Failed;
        record.error = Some("quota".into());
        state.resources.insert("hub".into(), record);

        let diffs = compute_diffs(&graph, &plan, &state, &provider, false, true).unwrap();
        let summary = DiffSummary::from_diffs(&diffs);
        assert!(!summary.has_changes());
        assert_eq!(summary.stale, 1);
        assert!(summary.needs_apply());
        assert!(diffs[0].needs_apply());

        state.resources.get_mut("hub").unwrap().status = NodeStatus::Applied;
        let diffs = compute_diffs(&graph, &plan, &state, &provider, false, true).unwrap();
        assert!(!DiffSummary::from_diffs(&diffs).needs_apply());
    }
}
