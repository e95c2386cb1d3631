//! Dependency graph builder
//!
//! Turns a sequence of [`ResourceDescriptor`]s into a validated, acyclic
//! [`ResourceGraph`]. Edges come from two places: the explicit `depends_on`
//! set of each descriptor, and implicit edges for every output reference
//! found in its properties.

use crate::error::ConfigError;
use crate::resource::{ResourceDescriptor, ResourceKind};
use crate::value::{OutputRef, Properties};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Explicit configuration passed to the builder at construction time.
///
/// Holds the values `Value::Config` keys resolve against.
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    pub values: BTreeMap<String, serde_json::Value>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

/// A resource in a built graph. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    /// Desired properties with every configuration key substituted
    pub desired_properties: Properties,
    /// Explicit and implicit dependencies
    pub dependency_ids: BTreeSet<String>,
}

/// A validated acyclic resource graph
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, ResourceNode>,
    /// Declaration order
    order: Vec<String>,
}

impl ResourceGraph {
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Map of node id to its dependency ids
    pub fn dependency_map(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.dependency_ids.clone()))
            .collect()
    }

    /// The given ids plus everything they transitively depend on
    pub fn with_dependencies<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<String> = ids.into_iter().map(str::to_string).collect();
        while let Some(id) = pending.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                pending.extend(node.dependency_ids.iter().cloned());
            }
        }
        seen
    }
}

/// Builds [`ResourceGraph`]s from descriptors
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    config: BuildConfig,
}

impl GraphBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Validate the descriptors and assemble them into a graph.
    ///
    /// Fails on the first configuration error; a cycle is reported with its
    /// full path.
    pub fn build(
        &self,
        descriptors: impl IntoIterator<Item = ResourceDescriptor>,
    ) -> Result<ResourceGraph, ConfigError> {
        let descriptors: Vec<ResourceDescriptor> = descriptors.into_iter().collect();

        let mut names = BTreeSet::new();
        for d in &descriptors {
            if !names.insert(d.name.as_str()) {
                return Err(ConfigError::DuplicateResource {
                    name: d.name.clone(),
                });
            }
        }

        let mut graph = ResourceGraph::default();
        for d in &descriptors {
            let node = self.node_from(d, &names)?;
            graph.order.push(node.id.clone());
            graph.nodes.insert(node.id.clone(), node);
        }

        if let Some(path) = find_cycle(&graph) {
            return Err(ConfigError::Cycle { path });
        }

        log::debug!("Built resource graph with {} nodes", graph.len());
        Ok(graph)
    }

    fn node_from(
        &self,
        d: &ResourceDescriptor,
        names: &BTreeSet<&str>,
    ) -> Result<ResourceNode, ConfigError> {
        for property in d.kind.required_properties() {
            if !d.properties.contains_key(*property) {
                return Err(ConfigError::MissingProperty {
                    resource: d.name.clone(),
                    kind: d.kind.to_string(),
                    property: (*property).to_string(),
                });
            }
        }

        let lookup = |key: &str| self.config.get(key).cloned();
        let mut desired_properties = Properties::new();
        for (key, value) in &d.properties {
            let value = value
                .clone()
                .substitute_config(&lookup)
                .map_err(|key| ConfigError::MissingConfig {
                    resource: d.name.clone(),
                    key,
                })?;
            desired_properties.insert(key.clone(), value);
        }

        let mut dependency_ids = BTreeSet::new();
        for dep in &d.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(ConfigError::UnknownDependency {
                    resource: d.name.clone(),
                    dependency: dep.clone(),
                });
            }
            dependency_ids.insert(dep.clone());
        }

        let mut refs: BTreeSet<OutputRef> = BTreeSet::new();
        for value in desired_properties.values() {
            value.output_refs(&mut refs);
        }
        for r in refs {
            if !names.contains(r.resource.as_str()) {
                return Err(ConfigError::UnknownReference {
                    resource: d.name.clone(),
                    target: r.resource,
                    attribute: r.attribute,
                });
            }
            dependency_ids.insert(r.resource);
        }

        Ok(ResourceNode {
            id: d.name.clone(),
            kind: d.kind,
            desired_properties,
            dependency_ids,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Three-color depth-first search. Returns the first cycle found.
fn find_cycle(graph: &ResourceGraph) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    for id in &graph.order {
        if marks.get(id.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited
            && let Some(cycle) = visit(graph, id, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    graph: &'a ResourceGraph,
    id: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    marks.insert(id, Mark::InProgress);
    stack.push(id);

    if let Some(node) = graph.nodes.get(id) {
        for dep in &node.dependency_ids {
            match marks.get(dep.as_str()).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => {}
                Mark::InProgress => {
                    let start = stack.iter().position(|s| *s == dep.as_str()).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|s| (*s).to_string()).collect();
                    path.push(dep.clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(graph, dep, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
    }

    stack.pop();
    marks.insert(id, Mark::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn project(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Project, name)
            .property("project_id", name)
            .property("name", "Hub")
    }

    fn service(name: &str, project: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Service, name)
            .property("service", format!("{name}.googleapis.com"))
            .property("project", Value::output(project, "project_id"))
    }

    #[test]
    fn test_output_reference_adds_implicit_edge() {
        let graph = GraphBuilder::default()
            .build([project("p"), service("iam", "p")])
            .unwrap();
        let node = graph.get("iam").unwrap();
        assert!(node.dependency_ids.contains("p"));
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let graph = GraphBuilder::default()
            .build([project("p"), service("sts", "p"), service("iam", "p")])
            .unwrap();
        let ids: Vec<_> = graph.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["p", "sts", "iam"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = GraphBuilder::default()
            .build([project("p"), project("p")])
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateResource { name: "p".into() });
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = GraphBuilder::default()
            .build([project("p").depends_on("ghost")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDependency { .. }));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = GraphBuilder::default()
            .build([service("iam", "ghost")])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownReference {
                resource: "iam".into(),
                target: "ghost".into(),
                attribute: "project_id".into(),
            }
        );
    }

    #[test]
    fn test_missing_required_property_rejected() {
        let d = ResourceDescriptor::new(ResourceKind::ServiceAccount, "sa").property("project", "p");
        let err = GraphBuilder::default().build([d]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingProperty {
                resource: "sa".into(),
                kind: "service_account".into(),
                property: "account_id".into(),
            }
        );
    }

    #[test]
    fn test_config_values_substituted() {
        let d = ResourceDescriptor::new(ResourceKind::Project, "p")
            .property("project_id", Value::config("gcp_project"))
            .property("name", "Hub");
        let graph = GraphBuilder::new(BuildConfig::new().with("gcp_project", "hub-123"))
            .build([d.clone()])
            .unwrap();
        assert_eq!(
            graph.get("p").unwrap().desired_properties["project_id"],
            Value::string("hub-123")
        );

        let err = GraphBuilder::default().build([d]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingConfig {
                resource: "p".into(),
                key: "gcp_project".into(),
            }
        );
    }

    #[test]
    fn test_cycle_reports_full_path() {
        let a = project("a").depends_on("c");
        let b = project("b").depends_on("a");
        let c = project("c").depends_on("b");
        let err = GraphBuilder::default().build([a, b, c]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Cycle {
                path: vec!["a".into(), "c".into(), "b".into(), "a".into()],
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let d = project("p").property("parent", Value::output("p", "number"));
        let err = GraphBuilder::default().build([d]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Cycle {
                path: vec!["p".into(), "p".into()],
            }
        );
    }

    #[test]
    fn test_with_dependencies_is_transitive() {
        let graph = GraphBuilder::default()
            .build([
                project("p"),
                service("iam", "p"),
                project("other"),
            ])
            .unwrap();
        let closure = graph.with_dependencies(["iam"]);
        assert_eq!(closure.into_iter().collect::<Vec<_>>(), ["iam", "p"]);
    }
}
