//! Execution planner - layers a resource graph into waves

use crate::graph::{ResourceGraph, ResourceNode};
use crate::resource::ResourceKind;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Ordered execution waves derived from a graph
///
/// Every node appears in exactly one wave, and a node's wave index is
/// strictly greater than the wave index of each of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub waves: Vec<Vec<String>>,
    /// Whether the plan was restricted to a target subset
    pub targeted: bool,
}

impl ExecutionPlan {
    /// Layer every node of the graph.
    pub fn new(graph: &ResourceGraph) -> Self {
        Self {
            waves: layer(&graph.dependency_map()),
            targeted: false,
        }
    }

    /// Layer the nodes matching a target filter plus their dependencies.
    ///
    /// Target format: "kind", "kind.name" or a bare name fragment.
    pub fn for_target(graph: &ResourceGraph, target: Option<&str>) -> Self {
        let Some(target) = target else {
            return Self::new(graph);
        };

        let (kind, name) = parse_target(target);
        let selected: Vec<&str> = graph
            .nodes()
            .filter(|n| matches_filter(n, kind, name.as_deref()))
            .map(|n| n.id.as_str())
            .collect();
        let keep = graph.with_dependencies(selected);

        let deps: BTreeMap<String, BTreeSet<String>> = graph
            .dependency_map()
            .into_iter()
            .filter(|(id, _)| keep.contains(id))
            .collect();

        Self {
            waves: layer(&deps),
            targeted: true,
        }
    }

    /// Wave index of a node, if it is part of the plan
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|n| n == id))
    }

    /// Node ids in execution order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.waves.iter().flatten().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids().any(|n| n == id)
    }

    pub fn total_resources(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

/// Longest-path layering: wave = 1 + max(wave of dependencies), or 0.
///
/// Dependencies outside the map are ignored. Nodes left over because of a
/// cycle are placed together in a final wave.
pub(crate) fn layer(deps: &BTreeMap<String, BTreeSet<String>>) -> Vec<Vec<String>> {
    let mut assigned: HashMap<&str, usize> = HashMap::new();
    let mut waves: Vec<Vec<String>> = Vec::new();

    while assigned.len() < deps.len() {
        let ready: Vec<&str> = deps
            .iter()
            .filter(|(id, _)| !assigned.contains_key(id.as_str()))
            .filter(|(_, ds)| {
                ds.iter()
                    .all(|d| !deps.contains_key(d) || assigned.contains_key(d.as_str()))
            })
            .map(|(id, _)| id.as_str())
            .collect();

        if ready.is_empty() {
            let rest: Vec<String> = deps
                .keys()
                .filter(|id| !assigned.contains_key(id.as_str()))
                .cloned()
                .collect();
            log::warn!("Unable to order {} resources with circular dependencies", rest.len());
            waves.push(rest);
            break;
        }

        let index = waves.len();
        for id in &ready {
            assigned.insert(*id, index);
        }
        waves.push(ready.into_iter().map(str::to_string).collect());
    }

    waves
}

/// Parse a target string like "service_account.bootstrap" into (kind, name)
fn parse_target(target: &str) -> (Option<ResourceKind>, Option<String>) {
    match target.split_once('.') {
        Some((kind, name)) => match kind.parse() {
            Ok(kind) => (Some(kind), Some(name.to_string())),
            Err(_) => (None, Some(target.to_string())),
        },
        None => match target.parse() {
            Ok(kind) => (Some(kind), None),
            Err(_) => (None, Some(target.to_string())),
        },
    }
}

/// Check if a node matches the filter criteria
fn matches_filter(node: &ResourceNode, kind: Option<ResourceKind>, name: Option<&str>) -> bool {
    if let Some(k) = kind
        && node.kind != k
    {
        return false;
    }

    if let Some(n) = name
        && !node.id.contains(n)
    {
        return false;
    }

    true
}
