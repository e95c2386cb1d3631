//! Stack configuration loading
//!
//! A stack file describes the required settings for the hub plus tuning for
//! the engine and the sandbox provider. TOML is the default format; a `.json`
//! extension switches to JSON.

use anyhow::{Context, Result, bail};
use reconcile::{BuildConfig, ExecuteOptions, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings every hub stack must define
pub const REQUIRED_SETTINGS: [&str; 4] =
    ["gcp_project", "billing_account_id", "folder_id", "github_org"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Values referenced by resources through config keys
    pub settings: BTreeMap<String, serde_json::Value>,
    pub hub: HubConfig,
    pub engine: EngineConfig,
    pub sandbox: SandboxConfig,
}

/// Names and lists that shape the hub topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub project_name: String,
    pub apis: Vec<String>,
    pub bootstrap_sa_id: String,
    pub bootstrap_sa_display_name: String,
    pub folder_roles: Vec<String>,
    pub wif_pool_id: String,
    pub wif_pool_display_name: String,
    pub wif_provider_id: String,
    pub wif_provider_display_name: String,
    pub issuer_uri: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            project_name: "Engineering Service Hub".to_string(),
            apis: [
                "iam.googleapis.com",
                "cloudresourcemanager.googleapis.com",
                "iamcredentials.googleapis.com",
                "sts.googleapis.com",
            ]
            .map(String::from)
            .to_vec(),
            bootstrap_sa_id: "engineering-service-org-sa".to_string(),
            bootstrap_sa_display_name: "Organization CI/CD Bootstrap Service Account".to_string(),
            folder_roles: [
                "roles/resourcemanager.projectCreator",
                "roles/iam.workloadIdentityPoolAdmin",
                "roles/iam.serviceAccountAdmin",
                "roles/serviceusage.serviceUsageAdmin",
            ]
            .map(String::from)
            .to_vec(),
            wif_pool_id: "github-pool".to_string(),
            wif_pool_display_name: "GitHub Actions WIF Pool".to_string(),
            wif_provider_id: "github-provider".to_string(),
            wif_provider_display_name: "GitHub OIDC Provider".to_string(),
            issuer_uri: "https://token.actions.githubusercontent.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub jobs: usize,
    pub prune: bool,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = ExecuteOptions::default();
        Self {
            jobs: defaults.jobs,
            prune: defaults.prune,
            retry: defaults.retry,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory holding the simulated inventory; defaults to the state dir
    pub inventory_dir: Option<String>,
    /// How long new identities stay invisible to IAM references
    pub propagation_delay_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            inventory_dir: None,
            propagation_delay_ms: 2000,
        }
    }
}

impl SandboxConfig {
    pub fn propagation_delay(&self) -> Duration {
        Duration::from_millis(self.propagation_delay_ms)
    }

    /// Resolve the inventory directory, falling back to `<state_dir>/sandbox`.
    pub fn inventory_dir(&self, state_file: &Path) -> PathBuf {
        match &self.inventory_dir {
            Some(dir) => crate::paths::expand(dir),
            None => state_file
                .parent()
                .map_or_else(|| PathBuf::from("sandbox"), |p| p.join("sandbox")),
        }
    }
}

impl StackConfig {
    /// Load a stack file, choosing the format from its extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "Could not read stack config {} (create it or pass --config)",
                path.display()
            )
        })?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let config: Self = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
        } else {
            toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))?
        };
        config.validate()?;
        log::debug!("Loaded stack config from {}", path.display());
        Ok(config)
    }

    /// Check the config for problems that do not need the graph to detect.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_SETTINGS
            .into_iter()
            .filter(|key| !self.settings.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            bail!("Missing required settings: {}", missing.join(", "));
        }
        if self.engine.jobs == 0 {
            bail!("engine.jobs must be at least 1");
        }
        if self.hub.apis.is_empty() {
            bail!("hub.apis must list at least one API");
        }
        let retry = &self.engine.retry;
        if !retry.jitter.is_finite() || !(0.0..=1.0).contains(&retry.jitter) {
            bail!("engine.retry.jitter must be a number between 0 and 1");
        }
        if !retry.multiplier.is_finite() || retry.multiplier <= 0.0 {
            bail!("engine.retry.multiplier must be a positive number");
        }
        Ok(())
    }

    pub fn build_config(&self) -> BuildConfig {
        self.settings
            .iter()
            .fold(BuildConfig::new(), |config, (k, v)| config.with(k.clone(), v.clone()))
    }

    /// Engine options with command-line overrides applied
    pub fn execute_options(&self, jobs: Option<usize>, refresh: bool, prune: bool) -> ExecuteOptions {
        ExecuteOptions {
            jobs: jobs.unwrap_or(self.engine.jobs).max(1),
            refresh,
            prune: prune && self.engine.prune,
            retry: self.engine.retry.clone(),
        }
    }

    /// Look up a setting as a string
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(serde_json::Value::as_str)
    }
}
