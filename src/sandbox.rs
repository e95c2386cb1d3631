//! Sandbox provider
//!
//! A simulated cloud inventory kept in a JSON file. It computes GCP-shaped
//! outputs, rejects properties the real APIs would refuse, and hides new
//! service accounts and pools from IAM references for a configurable delay
//! so the retry layer gets exercised the same way it would against the real
//! thing.

use chrono::{DateTime, Utc};
use reconcile::{
    Attributes, ErrorCategory, Observed, Provider, ProviderError, ResourceKind,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

type Pattern = LazyLock<Result<Regex, regex::Error>>;

static PROJECT_ID: Pattern = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$"));
static ACCOUNT_ID: Pattern = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$"));
static BILLING_ACCOUNT: Pattern =
    LazyLock::new(|| Regex::new(r"^[0-9A-F]{6}-[0-9A-F]{6}-[0-9A-F]{6}$"));
static FOLDER_ID: Pattern = LazyLock::new(|| Regex::new(r"^[0-9]+$"));
static FOLDER: Pattern = LazyLock::new(|| Regex::new(r"^folders/[0-9]+$"));
static SERVICE: Pattern = LazyLock::new(|| Regex::new(r"^[a-z0-9.-]+\.googleapis\.com$"));
static POOL_ID: Pattern = LazyLock::new(|| Regex::new(r"^[a-z0-9-]{4,32}$"));
static ROLE: Pattern =
    LazyLock::new(|| Regex::new(r"^(roles|projects/[^/]+/roles|organizations/[0-9]+/roles)/[A-Za-z0-9_.]+$"));
static MEMBER: Pattern =
    LazyLock::new(|| Regex::new(r"^(user|serviceAccount|group|domain|principal|principalSet):.+$"));
static CONDITION_ATTRIBUTE: Pattern = LazyLock::new(|| Regex::new(r"attribute\.([A-Za-z0-9_]+)"));

/// First numeric id handed out by a fresh inventory
const NUMBER_BASE: u64 = 100_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    kind: ResourceKind,
    properties: Attributes,
    outputs: Attributes,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inventory {
    #[serde(default)]
    next_number: u64,
    #[serde(default)]
    resources: BTreeMap<String, Entry>,
}

impl Inventory {
    fn find(&self, kind: ResourceKind, pred: impl Fn(&Entry) -> bool) -> Option<&Entry> {
        self.resources.values().find(|e| e.kind == kind && pred(e))
    }

    fn project_number(&self, project_id: &str) -> Result<String, ProviderError> {
        self.find(ResourceKind::Project, |e| str_of(&e.properties, "project_id") == Some(project_id))
            .and_then(|e| str_of(&e.outputs, "number"))
            .map(str::to_string)
            .ok_or_else(|| ProviderError::not_found(format!("project '{project_id}' not found")))
    }
}

/// File-backed simulated cloud
pub struct SandboxProvider {
    path: PathBuf,
    propagation_delay: Duration,
    lock: Mutex<()>,
}

impl SandboxProvider {
    pub fn open(dir: &Path, propagation_delay: Duration) -> Self {
        Self {
            path: dir.join("inventory.json"),
            propagation_delay,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load(&self) -> Result<Inventory, ProviderError> {
        if !self.path.exists() {
            return Ok(Inventory::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| io_error(&self.path, &e))?;
        serde_json::from_str(&content).map_err(|e| {
            ProviderError::new(
                ErrorCategory::Other,
                format!("corrupt sandbox inventory {}: {e}", self.path.display()),
            )
        })
    }

    fn save(&self, inventory: &Inventory) -> Result<(), ProviderError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, &e))?;
        }
        let content = serde_json::to_string_pretty(inventory)
            .map_err(|e| ProviderError::new(ErrorCategory::Other, e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| io_error(&tmp, &e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, &e))
    }

    fn visible(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(entry.created_at);
        age.to_std().is_ok_and(|age| age >= self.propagation_delay)
    }

    /// Fail transiently if `member` names an identity that has not propagated yet.
    fn check_member_visible(
        &self,
        inventory: &Inventory,
        member: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ProviderError> {
        if let Some(email) = member.strip_prefix("serviceAccount:")
            && let Some(sa) = inventory.find(ResourceKind::ServiceAccount, |e| {
                str_of(&e.outputs, "email") == Some(email)
            })
            && !self.visible(sa, now)
        {
            return Err(ProviderError::transient(format!(
                "Service account {email} does not exist."
            )));
        }

        if let Some(principal) = member.strip_prefix("principalSet://iam.googleapis.com/")
            && let Some(pool) = inventory.find(ResourceKind::WorkloadIdentityPool, |e| {
                str_of(&e.outputs, "name").is_some_and(|name| principal.starts_with(name))
            })
            && !self.visible(pool, now)
        {
            return Err(ProviderError::transient(format!(
                "Identity pool for principal set {principal} does not exist."
            )));
        }
        Ok(())
    }

    /// Compute the outputs the real API would report for a resource.
    fn outputs(
        &self,
        inventory: &mut Inventory,
        kind: ResourceKind,
        id: &str,
        desired: &Attributes,
        now: DateTime<Utc>,
    ) -> Result<Attributes, ProviderError> {
        let mut outputs = desired.clone();
        let existing = inventory.resources.get(id).map(|e| e.outputs.clone());

        match kind {
            ResourceKind::Project => {
                let number = allocate(inventory, existing.as_ref(), "number");
                outputs.insert("number".into(), json!(number));
            }
            ResourceKind::Service => {
                let project = require(desired, "project")?;
                let service = require(desired, "service")?;
                inventory.project_number(project)?;
                outputs.insert("id".into(), json!(format!("{project}/{service}")));
            }
            ResourceKind::ServiceAccount => {
                let project = require(desired, "project")?;
                let account_id = require(desired, "account_id")?;
                inventory.project_number(project)?;
                let email = format!("{account_id}@{project}.iam.gserviceaccount.com");
                outputs.insert("name".into(), json!(format!("projects/{project}/serviceAccounts/{email}")));
                outputs.insert("email".into(), json!(email));
                let unique_id = allocate(inventory, existing.as_ref(), "unique_id");
                outputs.insert("unique_id".into(), json!(unique_id));
            }
            ResourceKind::FolderIamMember => {
                let member = require(desired, "member")?;
                self.check_member_visible(inventory, member, now)?;
                let folder = require(desired, "folder")?;
                let role = require(desired, "role")?;
                outputs.insert("id".into(), json!(format!("{folder}/{role}/{member}")));
            }
            ResourceKind::ServiceAccountIamMember => {
                let account = require(desired, "service_account_id")?;
                match inventory.find(ResourceKind::ServiceAccount, |e| {
                    str_of(&e.outputs, "name") == Some(account)
                }) {
                    None => {
                        return Err(ProviderError::not_found(format!(
                            "service account '{account}' not found"
                        )));
                    }
                    Some(sa) if !self.visible(sa, now) => {
                        return Err(ProviderError::transient(format!(
                            "Service account {account} does not exist."
                        )));
                    }
                    Some(_) => {}
                }
                let member = require(desired, "member")?;
                self.check_member_visible(inventory, member, now)?;
                let role = require(desired, "role")?;
                outputs.insert("id".into(), json!(format!("{account}/{role}/{member}")));
            }
            ResourceKind::WorkloadIdentityPool => {
                let project = require(desired, "project")?;
                let pool_id = require(desired, "workload_identity_pool_id")?;
                let number = inventory.project_number(project)?;
                outputs.insert(
                    "name".into(),
                    json!(format!(
                        "projects/{number}/locations/global/workloadIdentityPools/{pool_id}"
                    )),
                );
                outputs.insert("state".into(), json!("ACTIVE"));
            }
            ResourceKind::WorkloadIdentityPoolProvider => {
                let project = require(desired, "project")?;
                let pool_id = require(desired, "workload_identity_pool_id")?;
                let provider_id = require(desired, "workload_identity_pool_provider_id")?;
                let pool = inventory
                    .find(ResourceKind::WorkloadIdentityPool, |e| {
                        str_of(&e.properties, "project") == Some(project)
                            && str_of(&e.properties, "workload_identity_pool_id") == Some(pool_id)
                    })
                    .ok_or_else(|| {
                        ProviderError::not_found(format!("workload identity pool '{pool_id}' not found"))
                    })?;
                if !self.visible(pool, now) {
                    return Err(ProviderError::transient(format!(
                        "Workload identity pool {pool_id} does not exist."
                    )));
                }
                let pool_name = str_of(&pool.outputs, "name").unwrap_or_default().to_string();
                outputs.insert("name".into(), json!(format!("{pool_name}/providers/{provider_id}")));
                outputs.insert("state".into(), json!("ACTIVE"));
            }
        }
        Ok(outputs)
    }

    fn upsert(
        &self,
        kind: ResourceKind,
        id: &str,
        desired: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        let _guard = self.guard();
        let mut inventory = self.load()?;
        let now = Utc::now();
        let outputs = self.outputs(&mut inventory, kind, id, desired, now)?;

        let created_at = inventory.resources.get(id).map_or(now, |e| e.created_at);
        inventory.resources.insert(
            id.to_string(),
            Entry {
                kind,
                properties: desired.clone(),
                outputs: outputs.clone(),
                created_at,
            },
        );
        self.save(&inventory)?;
        Ok(outputs)
    }
}

impl Provider for SandboxProvider {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn validate(&self, kind: ResourceKind, _id: &str, desired: &Attributes) -> Result<(), ProviderError> {
        match kind {
            ResourceKind::Project => {
                check(&PROJECT_ID, require(desired, "project_id")?, "project_id")?;
                if let Some(billing) = str_of(desired, "billing_account") {
                    check(&BILLING_ACCOUNT, billing, "billing_account")?;
                }
                if let Some(folder) = str_of(desired, "folder_id") {
                    check(&FOLDER_ID, folder, "folder_id")?;
                }
            }
            ResourceKind::Service => check(&SERVICE, require(desired, "service")?, "service")?,
            ResourceKind::ServiceAccount => {
                check(&ACCOUNT_ID, require(desired, "account_id")?, "account_id")?;
            }
            ResourceKind::FolderIamMember => {
                check(&FOLDER, require(desired, "folder")?, "folder")?;
                check(&ROLE, require(desired, "role")?, "role")?;
                check(&MEMBER, require(desired, "member")?, "member")?;
            }
            ResourceKind::ServiceAccountIamMember => {
                check(&ROLE, require(desired, "role")?, "role")?;
                check(&MEMBER, require(desired, "member")?, "member")?;
            }
            ResourceKind::WorkloadIdentityPool => {
                let pool_id = require(desired, "workload_identity_pool_id")?;
                check(&POOL_ID, pool_id, "workload_identity_pool_id")?;
                if pool_id.starts_with("gcp-") {
                    return Err(ProviderError::malformed(
                        "workload_identity_pool_id may not start with 'gcp-'",
                    ));
                }
            }
            ResourceKind::WorkloadIdentityPoolProvider => validate_oidc_provider(desired)?,
        }
        Ok(())
    }

    fn read(&self, _kind: ResourceKind, id: &str) -> Result<Option<Observed>, ProviderError> {
        let _guard = self.guard();
        let inventory = self.load()?;
        Ok(inventory.resources.get(id).map(|e| Observed {
            properties: e.properties.clone(),
            outputs: e.outputs.clone(),
        }))
    }

    fn create(&self, kind: ResourceKind, id: &str, desired: &Attributes) -> Result<Attributes, ProviderError> {
        log::debug!("sandbox: create {kind} {id}");
        self.upsert(kind, id, desired)
    }

    fn update(&self, kind: ResourceKind, id: &str, desired: &Attributes) -> Result<Attributes, ProviderError> {
        log::debug!("sandbox: update {kind} {id}");
        self.upsert(kind, id, desired)
    }

    fn delete(&self, _kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        let _guard = self.guard();
        let mut inventory = self.load()?;
        if inventory.resources.remove(id).is_some() {
            self.save(&inventory)?;
        }
        Ok(())
    }
}

fn validate_oidc_provider(desired: &Attributes) -> Result<(), ProviderError> {
    check(
        &POOL_ID,
        require(desired, "workload_identity_pool_provider_id")?,
        "workload_identity_pool_provider_id",
    )?;

    let issuer = require(desired, "issuer_uri")?;
    if !issuer.starts_with("https://") {
        return Err(ProviderError::malformed(format!("issuer_uri '{issuer}' must use https")));
    }

    let mapping = desired
        .get("attribute_mapping")
        .and_then(serde_json::Value::as_object);
    if let Some(mapping) = mapping
        && !mapping.contains_key("google.subject")
    {
        return Err(ProviderError::malformed("attribute_mapping must map google.subject"));
    }

    if let Some(condition) = str_of(desired, "attribute_condition") {
        if condition.contains("starts_with(") {
            return Err(ProviderError::malformed(
                "attribute_condition uses 'starts_with'; the CEL function is 'startsWith'",
            ));
        }
        for caps in pattern(&CONDITION_ATTRIBUTE)?.captures_iter(condition) {
            let key = format!("attribute.{}", &caps[1]);
            if !mapping.is_some_and(|m| m.contains_key(&key)) {
                return Err(ProviderError::malformed(format!(
                    "attribute_condition references unmapped {key}"
                )));
            }
        }
    }
    Ok(())
}

/// Keep a previously assigned numeric id, or hand out the next one.
fn allocate(inventory: &mut Inventory, existing: Option<&Attributes>, key: &str) -> String {
    if let Some(id) = existing.and_then(|o| str_of(o, key)) {
        return id.to_string();
    }
    inventory.next_number += 1;
    (NUMBER_BASE + inventory.next_number).to_string()
}

fn str_of<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(serde_json::Value::as_str)
}

fn require<'a>(attrs: &'a Attributes, key: &str) -> Result<&'a str, ProviderError> {
    str_of(attrs, key).ok_or_else(|| ProviderError::malformed(format!("'{key}' must be a string")))
}

fn pattern(lazy: &'static Pattern) -> Result<&'static Regex, ProviderError> {
    LazyLock::force(lazy)
        .as_ref()
        .map_err(|e| ProviderError::new(ErrorCategory::Other, e.to_string()))
}

fn check(lazy: &'static Pattern, value: &str, what: &str) -> Result<(), ProviderError> {
    if pattern(lazy)?.is_match(value) {
        Ok(())
    } else {
        Err(ProviderError::malformed(format!("{what} '{value}' is invalid")))
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> ProviderError {
    ProviderError::new(ErrorCategory::Other, format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn project() -> Attributes {
        attrs(&[
            ("project_id", json!("eng-hub-1234")),
            ("name", json!("Engineering Service Hub")),
            ("billing_account", json!("01A2B3-C4D5E6-F7A8B9")),
            ("folder_id", json!("123456789012")),
        ])
    }

    fn account() -> Attributes {
        attrs(&[
            ("project", json!("eng-hub-1234")),
            ("account_id", json!("engineering-service-org-sa")),
        ])
    }

    fn provider_props(condition: &str) -> Attributes {
        attrs(&[
            ("project", json!("eng-hub-1234")),
            ("workload_identity_pool_id", json!("github-pool")),
            ("workload_identity_pool_provider_id", json!("github-provider")),
            ("issuer_uri", json!("https://token.actions.githubusercontent.com")),
            (
                "attribute_mapping",
                json!({"google.subject": "assertion.sub", "attribute.repository": "assertion.repository"}),
            ),
            ("attribute_condition", json!(condition)),
        ])
    }

    #[test]
    fn test_outputs_are_gcp_shaped() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxProvider::open(dir.path(), Duration::ZERO);

        let project = sandbox.create(ResourceKind::Project, "p", &project()).unwrap();
        let number = project["number"].as_str().unwrap().to_string();

        let sa = sandbox.create(ResourceKind::ServiceAccount, "sa", &account()).unwrap();
        assert_eq!(
            sa["email"],
            json!("engineering-service-org-sa@eng-hub-1234.iam.gserviceaccount.com")
        );

        let pool = sandbox
            .create(
                ResourceKind::WorkloadIdentityPool,
                "pool",
                &attrs(&[
                    ("project", json!("eng-hub-1234")),
                    ("workload_identity_pool_id", json!("github-pool")),
                ]),
            )
            .unwrap();
        assert_eq!(
            pool["name"],
            json!(format!("projects/{number}/locations/global/workloadIdentityPools/github-pool"))
        );

        let provider = sandbox
            .create(
                ResourceKind::WorkloadIdentityPoolProvider,
                "provider",
                &provider_props("attribute.repository.startsWith('acme/')"),
            )
            .unwrap();
        assert!(provider["name"].as_str().unwrap().ends_with("/providers/github-provider"));
    }

    #[test]
    fn test_inventory_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        SandboxProvider::open(dir.path(), Duration::ZERO)
            .create(ResourceKind::Project, "p", &project())
            .unwrap();

        let reopened = SandboxProvider::open(dir.path(), Duration::ZERO);
        let observed = reopened.read(ResourceKind::Project, "p").unwrap().unwrap();
        assert_eq!(observed.properties, project());
        assert!(reopened.path().exists());
    }

    #[test]
    fn test_new_identity_is_not_visible_until_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxProvider::open(dir.path(), Duration::from_secs(3600));
        sandbox.create(ResourceKind::Project, "p", &project()).unwrap();
        let sa = sandbox.create(ResourceKind::ServiceAccount, "sa", &account()).unwrap();

        let binding = attrs(&[
            ("folder", json!("folders/123456789012")),
            ("role", json!("roles/resourcemanager.projectCreator")),
            ("member", json!(format!("serviceAccount:{}", sa["email"].as_str().unwrap()))),
        ]);
        let err = sandbox
            .create(ResourceKind::FolderIamMember, "binding", &binding)
            .unwrap_err();
        assert!(err.is_transient());
        assert!(sandbox.read(ResourceKind::FolderIamMember, "binding").unwrap().is_none());
    }

    #[test]
    fn test_missing_project_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxProvider::open(dir.path(), Duration::ZERO);
        let err = sandbox.create(ResourceKind::ServiceAccount, "sa", &account()).unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
    }

    #[test]
    fn test_validation_rejects_bad_properties() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxProvider::open(dir.path(), Duration::ZERO);

        let mut bad_project = project();
        bad_project.insert("project_id".into(), json!("Hub_Project"));
        let err = sandbox.validate(ResourceKind::Project, "p", &bad_project).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Malformed);

        let bad_role = attrs(&[
            ("folder", json!("folders/1")),
            ("role", json!("projectCreator")),
            ("member", json!("user:someone@example.com")),
        ]);
        assert!(sandbox.validate(ResourceKind::FolderIamMember, "b", &bad_role).is_err());

        let reserved = attrs(&[("workload_identity_pool_id", json!("gcp-pool"))]);
        assert!(sandbox.validate(ResourceKind::WorkloadIdentityPool, "pool", &reserved).is_err());
    }

    #[test]
    fn test_patterns_compile_once() {
        let all = [
            &PROJECT_ID,
            &ACCOUNT_ID,
            &BILLING_ACCOUNT,
            &FOLDER_ID,
            &FOLDER,
            &SERVICE,
            &POOL_ID,
            &ROLE,
            &MEMBER,
            &CONDITION_ATTRIBUTE,
        ];
        for lazy in all {
            let first = pattern(lazy).unwrap();
            assert!(std::ptr::eq(first, pattern(lazy).unwrap()));
        }
    }

    #[test]
    fn test_condition_must_use_cel_starts_with() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxProvider::open(dir.path(), Duration::ZERO);
        let kind = ResourceKind::WorkloadIdentityPoolProvider;

        assert!(sandbox
            .validate(kind, "p", &provider_props("attribute.repository.startsWith('acme/')"))
            .is_ok());

        let err = sandbox
            .validate(kind, "p", &provider_props("attribute.repository.starts_with('acme/')"))
            .unwrap_err();
        assert!(err.message.contains("startsWith"));

        let err = sandbox
            .validate(kind, "p", &provider_props("attribute.actor == 'octocat'"))
            .unwrap_err();
        assert!(err.message.contains("attribute.actor"));
    }

    #[test]
    fn test_delete_absent_resource_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxProvider::open(dir.path(), Duration::ZERO);
        sandbox.delete(ResourceKind::Project, "missing").unwrap();

        sandbox.create(ResourceKind::Project, "p", &project()).unwrap();
        sandbox.delete(ResourceKind::Project, "p").unwrap();
        assert!(sandbox.read(ResourceKind::Project, "p").unwrap().is_none());
    }
}
