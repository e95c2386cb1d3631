//! Hub bootstrap topology
//!
//! Declares the hub project, its APIs, the bootstrap service account with its
//! folder roles, and the GitHub Actions workload identity federation that is
//! allowed to impersonate it.

use crate::config::HubConfig;
use reconcile::{ExportSpec, ResourceDescriptor, ResourceKind, Value};

pub const PROJECT: &str = "hub-project";
pub const BOOTSTRAP_SA: &str = "bootstrap-sa";
pub const WIF_POOL: &str = "wif-pool";
pub const WIF_PROVIDER: &str = "wif-provider";
pub const WIF_BINDING: &str = "wif-bootstrap-sa-binding";

/// Resource name for an API enablement, e.g. `enable-iam-api`
pub fn api_resource(api: &str) -> String {
    let short = api.split('.').next().unwrap_or(api);
    format!("enable-{short}-api")
}

/// Resource name for a folder role grant
pub fn folder_binding_resource(role: &str) -> String {
    format!("bootstrap-sa-folder-binding-{}", role.replace(['.', '/'], "-"))
}

fn project_id() -> Value {
    Value::output(PROJECT, "project_id")
}

pub fn descriptors(hub: &HubConfig) -> Vec<ResourceDescriptor> {
    let mut out = Vec::new();

    out.push(
        ResourceDescriptor::new(ResourceKind::Project, PROJECT)
            .property("project_id", Value::config("gcp_project"))
            .property("name", hub.project_name.as_str())
            .property("folder_id", Value::config("folder_id"))
            .property("billing_account", Value::config("billing_account_id")),
    );

    let apis: Vec<String> = hub.apis.iter().map(|api| api_resource(api)).collect();
    for (api, name) in hub.apis.iter().zip(&apis) {
        out.push(
            ResourceDescriptor::new(ResourceKind::Service, name)
                .property("service", api.as_str())
                .property("project", project_id())
                .property("disable_on_destroy", false)
                .depends_on(PROJECT),
        );
    }

    out.push(
        ResourceDescriptor::new(ResourceKind::ServiceAccount, BOOTSTRAP_SA)
            .property("account_id", hub.bootstrap_sa_id.as_str())
            .property("display_name", hub.bootstrap_sa_display_name.as_str())
            .property("project", project_id())
            .depends_on_all(apis.iter().cloned()),
    );

    // Billing user is granted out of band.
    for role in &hub.folder_roles {
        out.push(
            ResourceDescriptor::new(ResourceKind::FolderIamMember, folder_binding_resource(role))
                .property("folder", Value::concat(["folders/".into(), Value::config("folder_id")]))
                .property("role", role.as_str())
                .property(
                    "member",
                    Value::concat(["serviceAccount:".into(), Value::output(BOOTSTRAP_SA, "email")]),
                ),
        );
    }

    out.push(
        ResourceDescriptor::new(ResourceKind::WorkloadIdentityPool, WIF_POOL)
            .property("workload_identity_pool_id", hub.wif_pool_id.as_str())
            .property("display_name", hub.wif_pool_display_name.as_str())
            .property("project", project_id())
            .depends_on_all(apis.iter().cloned()),
    );

    out.push(
        ResourceDescriptor::new(ResourceKind::WorkloadIdentityPoolProvider, WIF_PROVIDER)
            .property(
                "workload_identity_pool_id",
                Value::output(WIF_POOL, "workload_identity_pool_id"),
            )
            .property("workload_identity_pool_provider_id", hub.wif_provider_id.as_str())
            .property("display_name", hub.wif_provider_display_name.as_str())
            .property("project", project_id())
            .property("issuer_uri", hub.issuer_uri.as_str())
            .property(
                "attribute_mapping",
                Value::map([
                    ("google.subject", Value::from("assertion.sub")),
                    ("attribute.actor", Value::from("assertion.actor")),
                    ("attribute.repository", Value::from("assertion.repository")),
                    ("attribute.repository_owner", Value::from("assertion.repository_owner")),
                ]),
            )
            .property(
                "attribute_condition",
                Value::concat([
                    "attribute.repository.startsWith('".into(),
                    Value::config("github_org"),
                    "/')".into(),
                ]),
            ),
    );

    out.push(
        ResourceDescriptor::new(ResourceKind::ServiceAccountIamMember, WIF_BINDING)
            .property("service_account_id", Value::output(BOOTSTRAP_SA, "name"))
            .property("role", "roles/iam.workloadIdentityUser")
            .property(
                "member",
                Value::concat([
                    "principalSet://iam.googleapis.com/".into(),
                    Value::output(WIF_POOL, "name"),
                    "/attribute.repository_owner/".into(),
                    Value::config("github_org"),
                ]),
            )
            .depends_on(WIF_PROVIDER),
    );

    out
}

/// Named outputs of a hub run
pub fn exports() -> Vec<ExportSpec> {
    vec![
        ExportSpec::new("hub_project_id", PROJECT, "project_id"),
        ExportSpec::new("bootstrap_sa_email", BOOTSTRAP_SA, "email"),
        ExportSpec::new("workload_identity_pool_id", WIF_POOL, "workload_identity_pool_id"),
        ExportSpec::new("workload_identity_provider_name", WIF_PROVIDER, "name"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::sandbox::SandboxProvider;
    use reconcile::{
        ConfigError, Engine, ExecutionPlan, GraphBuilder, JsonFileStore, NoProgress, NodeStatus,
        RetryPolicy, StateStore,
    };
    use std::time::Duration;

    fn stack() -> StackConfig {
        let mut config = StackConfig::default();
        for (k, v) in [
            ("gcp_project", "eng-hub-1234"),
            ("billing_account_id", "01A2B3-C4D5E6-F7A8B9"),
            ("folder_id", "123456789012"),
            ("github_org", "acme"),
        ] {
            config.settings.insert(k.to_string(), v.into());
        }
        config
    }

    #[test]
    fn test_resource_names() {
        assert_eq!(api_resource("iamcredentials.googleapis.com"), "enable-iamcredentials-api");
        assert_eq!(
            folder_binding_resource("roles/iam.serviceAccountAdmin"),
            "bootstrap-sa-folder-binding-roles-iam-serviceAccountAdmin"
        );
    }

    #[test]
    fn test_hub_waves() {
        let config = stack();
        let graph = GraphBuilder::new(config.build_config())
            .build(descriptors(&config.hub))
            .unwrap();
        let plan = ExecutionPlan::new(&graph);

        assert_eq!(graph.len(), 1 + 4 + 1 + 4 + 1 + 1 + 1);
        assert_eq!(plan.waves.len(), 5);
        assert_eq!(plan.wave_of(PROJECT), Some(0));
        assert_eq!(plan.wave_of("enable-sts-api"), Some(1));
        assert_eq!(plan.wave_of(BOOTSTRAP_SA), Some(2));
        assert_eq!(plan.wave_of(WIF_POOL), Some(2));
        assert_eq!(plan.wave_of(WIF_PROVIDER), Some(3));
        assert_eq!(
            plan.wave_of(&folder_binding_resource("roles/resourcemanager.projectCreator")),
            Some(3)
        );
        assert_eq!(plan.wave_of(WIF_BINDING), Some(4));
    }

    #[test]
    fn test_binding_depends_on_pool_and_account() {
        let config = stack();
        let graph = GraphBuilder::new(config.build_config())
            .build(descriptors(&config.hub))
            .unwrap();
        let binding = graph.get(WIF_BINDING).unwrap();
        for dep in [BOOTSTRAP_SA, WIF_POOL, WIF_PROVIDER] {
            assert!(binding.dependency_ids.contains(dep), "missing {dep}");
        }
    }

    #[test]
    fn test_missing_setting_fails_build() {
        let mut config = stack();
        config.settings.remove("github_org");
        let err = GraphBuilder::new(config.build_config())
            .build(descriptors(&config.hub))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingConfig { key, .. } if key == "github_org"));
    }

    #[test]
    fn test_export_names() {
        let names: Vec<String> = exports().into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            [
                "hub_project_id",
                "bootstrap_sa_email",
                "workload_identity_pool_id",
                "workload_identity_provider_name"
            ]
        );
    }

    #[test]
    fn test_apply_against_sandbox_waits_for_propagation() {
        let dir = tempfile::tempdir().unwrap();
        let config = stack();
        let graph = GraphBuilder::new(config.build_config())
            .build(descriptors(&config.hub))
            .unwrap();
        let plan = ExecutionPlan::new(&graph);

        let provider = SandboxProvider::open(&dir.path().join("sandbox"), Duration::from_millis(200));
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let mut options = config.execute_options(Some(4), false, true);
        options.retry = RetryPolicy {
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(100),
            max_attempts: 20,
            ..RetryPolicy::default()
        };

        let result = Engine::new(&provider, &store, options.clone())
            .apply(&graph, &plan, &exports(), &mut NoProgress)
            .unwrap();
        assert!(result.is_success(), "{:?}", result.nodes);

        let binding = &result.nodes[&folder_binding_resource("roles/iam.serviceAccountAdmin")];
        assert!(binding.attempts > 1);
        assert_eq!(
            result.exports["bootstrap_sa_email"],
            "engineering-service-org-sa@eng-hub-1234.iam.gserviceaccount.com"
        );
        assert!(
            result.exports["workload_identity_provider_name"]
                .as_str()
                .unwrap()
                .ends_with("/workloadIdentityPools/github-pool/providers/github-provider")
        );

        let rerun = Engine::new(&provider, &store, options)
            .apply(&graph, &plan, &exports(), &mut NoProgress)
            .unwrap();
        assert!(rerun.nodes.values().all(|n| n.status == NodeStatus::Unchanged));
        assert_eq!(store.load().unwrap().exports, result.exports);
    }
}
