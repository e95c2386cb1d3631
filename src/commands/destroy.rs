use super::{Workspace, confirm_proceed};
use crate::Context;
use crate::progress::WaveProgress;
use crate::ui;
use anyhow::{Context as _, Result};
use colored::Colorize;
use reconcile::{Engine, StateStore};
use std::process::ExitCode;

pub fn run(ctx: &Context, yes: bool) -> Result<ExitCode> {
    let ws = Workspace::open(ctx)?;
    let state = ws.store.load().context("Failed to load state")?;
    if state.resources.is_empty() {
        ui::info("Nothing to destroy");
        return Ok(ExitCode::SUCCESS);
    }

    if !ctx.quiet {
        ui::header(&format!("{} resources will be destroyed", state.resources.len()));
        for (id, record) in &state.resources {
            println!("  {} {:<40} {}", "-".red(), id, record.kind.to_string().dimmed());
        }
    }

    if !yes && !confirm_proceed("Destroy all managed resources?")? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(ExitCode::SUCCESS);
    }

    let options = ws.config.execute_options(None, false, true);
    let engine = Engine::new(&ws.provider, &ws.store, options).with_cancel(ctx.cancel.clone());
    let mut progress = WaveProgress::new(state.resources.len(), ctx.verbose > 0);
    let result = engine.destroy(&mut progress);
    progress.finish();
    let result = result.context("Destroy aborted")?;

    ui::print_run_summary(&result, "Destroy");
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
