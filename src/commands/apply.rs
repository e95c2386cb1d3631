use super::{Workspace, confirm_proceed, plan_for};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::hub;
use crate::progress::WaveProgress;
use crate::ui;
use anyhow::{Context as _, Result};
use colored::Colorize;
use reconcile::{DiffSummary, Engine};
use std::process::ExitCode;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<ExitCode> {
    let ws = Workspace::open(ctx)?;
    let graph = ws.graph()?;
    let plan = plan_for(&graph, args.target.as_deref())?;
    let options = ws
        .config
        .execute_options(args.jobs, args.refresh, !args.no_prune);
    let jobs = options.jobs;

    let engine = Engine::new(&ws.provider, &ws.store, options).with_cancel(ctx.cancel.clone());
    let diffs = engine.plan(&graph, &plan).context("Failed to compute plan")?;
    let summary = DiffSummary::from_diffs(&diffs);

    if !ctx.quiet {
        ui::display_diff(&diffs);
    }
    if !summary.needs_apply() {
        return Ok(ExitCode::SUCCESS);
    }

    if !args.yes && !confirm_proceed("Apply these changes?")? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!(
        "  {} Applying {} resources in {} waves ({} workers)...",
        "→".cyan(),
        plan.total_resources(),
        plan.waves.len(),
        jobs
    );

    let mut progress = WaveProgress::new(plan.total_resources() + summary.removals, ctx.verbose > 0);
    let result = engine.apply(&graph, &plan, &hub::exports(), &mut progress);
    progress.finish();
    let result = result.context("Apply aborted")?;

    ui::print_run_summary(&result, "Apply");
    if result.is_success() {
        if !ctx.quiet {
            ui::print_exports(&result.exports);
        }
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{CancelToken, JsonFileStore, NodeStatus, StateStore};
    use std::fs;
    use std::path::Path;

    fn write_stack(path: &Path, pool_id: &str) {
        let stack = format!(
            r#"
[settings]
gcp_project = "eng-hub-1234"
billing_account_id = "01A2B3-C4D5E6-F7A8B9"
folder_id = "123456789012"
github_org = "acme"

[hub]
wif_pool_id = "{pool_id}"

[sandbox]
propagation_delay_ms = 0
"#
        );
        fs::write(path, stack).unwrap();
    }

    fn args() -> ApplyArgs {
        ApplyArgs {
            target: None,
            jobs: Some(2),
            refresh: false,
            no_prune: false,
            yes: true,
        }
    }

    #[test]
    fn test_reverting_a_failed_change_repairs_state() {
        let dir = tempfile::tempdir().unwrap();
        let stack = dir.path().join("stack.toml");
        let state = dir.path().join("state.json");
        let ctx = Context {
            verbose: 0,
            quiet: true,
            config: Some(stack.clone()),
            state: Some(state.clone()),
            cancel: CancelToken::new(),
        };

        write_stack(&stack, "github-pool");
        assert_eq!(run(&ctx, &args()).unwrap(), ExitCode::SUCCESS);

        write_stack(&stack, "gcp-pool");
        assert_eq!(run(&ctx, &args()).unwrap(), ExitCode::FAILURE);
        let failed = JsonFileStore::new(&state).load().unwrap();
        assert_eq!(failed.resources[hub::WIF_POOL].status, NodeStatus::Failed);
        assert_eq!(failed.resources[hub::WIF_BINDING].status, NodeStatus::Blocked);

        write_stack(&stack, "github-pool");
        assert_eq!(run(&ctx, &args()).unwrap(), ExitCode::SUCCESS);
        let repaired = JsonFileStore::new(&state).load().unwrap();
        for (id, record) in &repaired.resources {
            assert!(record.is_settled(), "{id} is still {}", record.status);
            assert!(record.error.is_none(), "{id} kept {:?}", record.error);
        }
        assert!(
            repaired.exports["workload_identity_pool_id"]
                .as_str()
                .is_some_and(|id| id == "github-pool")
        );
    }
}
