//! Provider adapter interface
//!
//! A [`Provider`] translates a resource's desired state into calls against a
//! backing API and reports what actually exists. Implementations must make
//! `create` safe to reach with an already-existing resource: the engine always
//! goes through [`ensure`], which reads before it mutates.

use crate::error::ProviderError;
use crate::resource::ResourceKind;
use crate::value::Attributes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Actual state of a resource as reported by a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observed {
    /// Properties as they exist remotely
    pub properties: Attributes,
    /// Output attributes dependents may reference
    pub outputs: Attributes,
}

/// Capability interface implemented per backing API
///
/// Intra-wave ordering is unspecified: calls for independent resources may
/// arrive concurrently and in any order.
pub trait Provider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "provider"
    }

    /// Reject desired state that the backing API would refuse.
    fn validate(
        &self,
        _kind: ResourceKind,
        _id: &str,
        _desired: &Attributes,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Current state, or `None` if the resource does not exist
    fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<Observed>, ProviderError>;

    fn create(
        &self,
        kind: ResourceKind,
        id: &str,
        desired: &Attributes,
    ) -> Result<Attributes, ProviderError>;

    fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        desired: &Attributes,
    ) -> Result<Attributes, ProviderError>;

    /// Delete the resource. Deleting an absent resource succeeds.
    fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError>;
}

/// What the engine did (or would do) to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    NoOp,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoOp => "no-op",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Whether the remote properties already satisfy the desired ones.
///
/// Only desired keys are compared; providers may report extra properties.
pub fn satisfies(observed: &Attributes, desired: &Attributes) -> bool {
    desired.iter().all(|(k, v)| observed.get(k) == Some(v))
}

/// Keys whose remote value differs from the desired value
pub fn changed_keys(observed: &Attributes, desired: &Attributes) -> Vec<String> {
    desired
        .iter()
        .filter(|(k, v)| observed.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect()
}

/// Idempotently converge one resource: read, then create, update or nothing.
pub fn ensure(
    provider: &dyn Provider,
    kind: ResourceKind,
    id: &str,
    desired: &Attributes,
) -> Result<(Action, Attributes), ProviderError> {
    match provider.read(kind, id)? {
        None => Ok((Action::Create, provider.create(kind, id, desired)?)),
        Some(observed) if satisfies(&observed.properties, desired) => {
            Ok((Action::NoOp, observed.outputs))
        }
        Some(_) => Ok((Action::Update, provider.update(kind, id, desired)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use serde_json::json;

    fn desired(name: &str) -> Attributes {
        Attributes::from([
            ("project_id".to_string(), json!("hub")),
            ("name".to_string(), json!(name)),
        ])
    }

    #[test]
    fn test_ensure_creates_then_is_noop() {
        let provider = MemoryProvider::new();
        let (action, outputs) = ensure(&provider, ResourceKind::Project, "p", &desired("Hub")).unwrap();
        assert_eq!(action, Action::Create);
        assert_eq!(outputs["project_id"], json!("hub"));

        let (action, _) = ensure(&provider, ResourceKind::Project, "p", &desired("Hub")).unwrap();
        assert_eq!(action, Action::NoOp);
        assert_eq!(provider.mutations("p"), 1);
    }

    #[test]
    fn test_ensure_updates_drift() {
        let provider = MemoryProvider::new();
        ensure(&provider, ResourceKind::Project, "p", &desired("Hub")).unwrap();
        let (action, outputs) =
            ensure(&provider, ResourceKind::Project, "p", &desired("Renamed")).unwrap();
        assert_eq!(action, Action::Update);
        assert_eq!(outputs["name"], json!("Renamed"));
    }

    #[test]
    fn test_satisfies_ignores_extra_remote_keys() {
        let mut remote = desired("Hub");
        remote.insert("number".into(), json!(7));
        assert!(satisfies(&remote, &desired("Hub")));
        assert_eq!(changed_keys(&remote, &desired("Other")), ["name"]);
    }
}
