//! Resource descriptors
//!
//! A [`ResourceDescriptor`] is the immutable declaration of one desired
//! resource: what kind it is, its logical name, its desired properties and
//! the resources it explicitly depends on.

use crate::value::{Properties, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The kinds of resources the engine knows how to reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    /// API enablement on a project
    Service,
    ServiceAccount,
    FolderIamMember,
    ServiceAccountIamMember,
    WorkloadIdentityPool,
    WorkloadIdentityPoolProvider,
}

impl ResourceKind {
    pub const ALL: [Self; 7] = [
        Self::Project,
        Self::Service,
        Self::ServiceAccount,
        Self::FolderIamMember,
        Self::ServiceAccountIamMember,
        Self::WorkloadIdentityPool,
        Self::WorkloadIdentityPoolProvider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Service => "service",
            Self::ServiceAccount => "service_account",
            Self::FolderIamMember => "folder_iam_member",
            Self::ServiceAccountIamMember => "service_account_iam_member",
            Self::WorkloadIdentityPool => "workload_identity_pool",
            Self::WorkloadIdentityPoolProvider => "workload_identity_pool_provider",
        }
    }

    /// Human-readable group name for diff output
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Project => "Projects",
            Self::Service => "Enabled APIs",
            Self::ServiceAccount => "Service accounts",
            Self::FolderIamMember => "Folder IAM members",
            Self::ServiceAccountIamMember => "Service account IAM members",
            Self::WorkloadIdentityPool => "Workload identity pools",
            Self::WorkloadIdentityPoolProvider => "Workload identity providers",
        }
    }

    /// Properties a descriptor of this kind must declare.
    pub fn required_properties(&self) -> &'static [&'static str] {
        match self {
            Self::Project => &["project_id", "name"],
            Self::Service => &["project", "service"],
            Self::ServiceAccount => &["project", "account_id"],
            Self::FolderIamMember => &["folder", "role", "member"],
            Self::ServiceAccountIamMember => &["service_account_id", "role", "member"],
            Self::WorkloadIdentityPool => &["project", "workload_identity_pool_id"],
            Self::WorkloadIdentityPoolProvider => &[
                "project",
                "workload_identity_pool_id",
                "workload_identity_pool_provider_id",
                "issuer_uri",
            ],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

/// Declaration of one desired resource
///
/// # Example
///
/// ```
/// use reconcile::{ResourceDescriptor, ResourceKind, Value};
///
/// let sa = ResourceDescriptor::new(ResourceKind::ServiceAccount, "bootstrap-sa")
///     .property("account_id", "ci-bootstrap")
///     .property("project", Value::output("hub-project", "project_id"))
///     .depends_on("enable-iam-api");
///
/// assert_eq!(sa.name, "bootstrap-sa");
/// assert!(sa.depends_on.contains("enable-iam-api"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    /// Logical name, unique within a resource set
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    /// Explicit dependencies by logical name
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            properties: Properties::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    pub fn depends_on_all<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("bucket".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_builder_collects_dependencies() {
        let d = ResourceDescriptor::new(ResourceKind::ServiceAccount, "sa")
            .depends_on_all(["e1", "e2"])
            .depends_on("e1");
        assert_eq!(d.depends_on.len(), 2);
    }
}
