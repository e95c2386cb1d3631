use super::{Workspace, plan_for};
use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;
use anyhow::{Context as _, Result};
use reconcile::{DiffSummary, Engine};
use std::process::ExitCode;

/// Exit code when the plan has pending changes
pub const CHANGES_PENDING: u8 = 2;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<ExitCode> {
    let ws = Workspace::open(ctx)?;
    let graph = ws.graph()?;
    let plan = plan_for(&graph, args.target.as_deref())?;
    let options = ws.config.execute_options(None, args.refresh, true);

    let diffs = Engine::new(&ws.provider, &ws.store, options)
        .plan(&graph, &plan)
        .context("Failed to compute plan")?;

    if !ctx.quiet {
        ui::display_diff(&diffs);
    }

    if DiffSummary::from_diffs(&diffs).needs_apply() {
        Ok(ExitCode::from(CHANGES_PENDING))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
