use super::state_file;
use crate::Context;
use crate::ui;
use anyhow::{Context as _, Result};
use reconcile::{JsonFileStore, StateStore};

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let path = state_file(ctx)?;
    let state = JsonFileStore::new(&path)
        .load()
        .with_context(|| format!("Failed to load state from {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state.exports)?);
    } else {
        ui::print_exports(&state.exports);
    }
    Ok(())
}
