//! Subcommand implementations
//!
//! Every command except `outputs` loads the stack config, builds the hub
//! graph and talks to the sandbox provider; [`Workspace`] bundles that setup.

pub mod apply;
pub mod destroy;
pub mod outputs;
pub mod plan;

use crate::Context;
use crate::config::StackConfig;
use crate::hub;
use crate::paths;
use crate::sandbox::SandboxProvider;
use anyhow::{Context as _, Result, bail};
use reconcile::{ExecutionPlan, GraphBuilder, JsonFileStore, ResourceGraph};
use std::path::PathBuf;

/// Everything a command needs to talk to the engine
pub struct Workspace {
    pub config: StackConfig,
    pub store: JsonFileStore,
    pub provider: SandboxProvider,
}

impl Workspace {
    pub fn open(ctx: &Context) -> Result<Self> {
        let config_path = match &ctx.config {
            Some(path) => path.clone(),
            None => paths::default_config_file()?,
        };
        let config = StackConfig::load(&config_path)?;
        let state_path = state_file(ctx)?;
        let provider = SandboxProvider::open(
            &config.sandbox.inventory_dir(&state_path),
            config.sandbox.propagation_delay(),
        );
        log::info!(
            "Stack for project {} (state {}, inventory {})",
            config.setting("gcp_project").unwrap_or("<unset>"),
            state_path.display(),
            provider.path().display()
        );

        Ok(Self {
            provider,
            store: JsonFileStore::new(state_path),
            config,
        })
    }

    pub fn graph(&self) -> Result<ResourceGraph> {
        GraphBuilder::new(self.config.build_config())
            .build(hub::descriptors(&self.config.hub))
            .context("Invalid hub configuration")
    }
}

/// Plan the whole graph, or only a target and its dependencies.
pub fn plan_for(graph: &ResourceGraph, target: Option<&str>) -> Result<ExecutionPlan> {
    let plan = ExecutionPlan::for_target(graph, target);
    if let Some(target) = target
        && plan.is_empty()
    {
        bail!("No resources match target '{target}'");
    }
    Ok(plan)
}

pub fn state_file(ctx: &Context) -> Result<PathBuf> {
    match &ctx.state {
        Some(path) => Ok(path.clone()),
        None => paths::default_state_file(),
    }
}

/// Ask before mutating anything.
pub fn confirm_proceed(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()
        .context("Confirmation needs an interactive terminal (pass --yes to skip it)")?;

    Ok(confirmed)
}
