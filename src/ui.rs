use colored::Colorize;
use reconcile::{Action, DiffSummary, NodeReport, NodeStatus, ResourceDiff, RunResult, group_by_kind};
use std::collections::BTreeMap;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

fn action_symbol(action: Action) -> colored::ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Delete => "-".red(),
        Action::NoOp => "↻".cyan(),
    }
}

fn diff_detail(diff: &ResourceDiff) -> String {
    match diff.action {
        Action::Create if diff.pending.is_empty() => "(will create)".to_string(),
        Action::Create => format!("(will create; {} known after apply)", diff.pending.join(", ")),
        Action::Update => {
            let changed: Vec<&str> = diff
                .changed
                .iter()
                .filter(|k| !diff.pending.contains(k))
                .map(String::as_str)
                .collect();
            match (changed.is_empty(), diff.pending.is_empty()) {
                (false, true) => format!("{} changed", changed.join(", ")),
                (true, false) => format!("{} known after apply", diff.pending.join(", ")),
                _ => format!(
                    "{} changed; {} known after apply",
                    changed.join(", "),
                    diff.pending.join(", ")
                ),
            }
        }
        Action::Delete => "(will delete)".to_string(),
        Action::NoOp if diff.stale => "(matches; state record will be updated)".to_string(),
        Action::NoOp => String::new(),
    }
}

/// Display planned changes grouped by resource kind
pub fn display_diff(diffs: &[ResourceDiff]) {
    let summary = DiffSummary::from_diffs(diffs);
    if !summary.needs_apply() {
        println!();
        println!("  {} No changes. Infrastructure matches the configuration.", "✓".green());
        return;
    }

    let changed: Vec<ResourceDiff> = diffs.iter().filter(|d| d.needs_apply()).cloned().collect();

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");
    for (kind, kind_diffs) in group_by_kind(&changed) {
        println!("│ {}", kind.display_name().bold());
        for diff in kind_diffs {
            let wave = diff
                .wave
                .map_or_else(String::new, |w| format!("[wave {w}] ").dimmed().to_string());
            println!(
                "│   {} {}{:<36} {}",
                action_symbol(diff.action),
                wave,
                diff.id,
                diff_detail(diff).dimmed()
            );
        }
        println!("│");
    }
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to add, {} to change, {} to destroy ({} unchanged)",
        summary.additions.to_string().green().bold(),
        summary.modifications.to_string().yellow().bold(),
        summary.removals.to_string().red().bold(),
        summary.unchanged
    );
    if summary.stale > 0 {
        println!("│ {} state records to repair", summary.stale.to_string().cyan().bold());
    }
    println!("└─────────────────────────────────────────────────────┘");
}

/// Symbol for a finished node
pub fn status_symbol(status: NodeStatus) -> colored::ColoredString {
    match status {
        NodeStatus::Applied => "✓".green(),
        NodeStatus::Unchanged => "○".dimmed(),
        NodeStatus::Deleted => "-".red(),
        NodeStatus::Failed => "✗".red(),
        NodeStatus::Blocked => "⊘".yellow(),
    }
}

/// Print the outcome of a run, e.g. `print_run_summary(&result, "Apply")`
pub fn print_run_summary(result: &RunResult, verb: &str) {
    let summary = result.summary();
    println!();
    if result.is_success() {
        println!("  {} {verb} complete!", "✓".green().bold());
    } else if result.cancelled {
        println!("  {} Run cancelled", "⚠".yellow().bold());
    } else {
        println!("  {} {verb} finished with errors", "⚠".yellow().bold());
    }

    if summary.applied > 0 {
        println!("    • {} resources applied", summary.applied);
    }
    if summary.unchanged > 0 {
        println!("    • {} resources unchanged", summary.unchanged);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.blocked > 0 {
        println!("    • {} {} blocked", summary.blocked, "resources".yellow());
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }

    let failures: Vec<&NodeReport> = result
        .nodes
        .values()
        .filter(|n| !n.status.is_success())
        .collect();
    if !failures.is_empty() {
        println!();
        for node in failures {
            println!(
                "  {} {} ({}): {}",
                status_symbol(node.status),
                node.id.bold(),
                node.kind,
                node.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Print named exports as aligned key-value pairs
pub fn print_exports(exports: &BTreeMap<String, serde_json::Value>) {
    if exports.is_empty() {
        dim("No outputs recorded yet. Run `hubstrap apply` first.");
        return;
    }
    header("Outputs");
    for (name, value) in exports {
        let rendered = value
            .as_str()
            .map_or_else(|| value.to_string(), str::to_string);
        kv(name, &rendered);
    }
}
