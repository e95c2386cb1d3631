use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hubstrap")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Bootstrap a GCP hub project with GitHub workload identity federation", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack config file (default: ~/.config/hubstrap/stack.toml)
    #[arg(long, global = true, env = "HUBSTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// State file (default: ~/.local/state/hubstrap/state.json)
    #[arg(long, global = true, env = "HUBSTRAP_STATE")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change (exit 2 if there are changes)
    Plan(PlanArgs),

    /// Converge resources to the configuration
    Apply(ApplyArgs),

    /// Delete every managed resource, dependents first
    Destroy {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the outputs of the last apply
    Outputs {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
pub struct PlanArgs {
    /// Limit to a resource and its dependencies (kind, name, or kind.name)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Read actual state from the provider instead of trusting the state file
    #[arg(long)]
    pub refresh: bool,
}

#[derive(clap::Args)]
pub struct ApplyArgs {
    /// Limit to a resource and its dependencies (kind, name, or kind.name)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Parallel workers per wave (default from [engine] jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Read actual state from the provider instead of trusting the state file
    #[arg(long)]
    pub refresh: bool,

    /// Keep resources that are no longer declared
    #[arg(long)]
    pub no_prune: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::parse_from(["hubstrap", "-vv", "apply", "--jobs", "2", "--no-prune", "-y"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.jobs, Some(2));
                assert!(args.no_prune);
                assert!(args.yes);
                assert!(!args.refresh);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_paths_after_subcommand() {
        let cli = Cli::parse_from(["hubstrap", "plan", "--config", "/tmp/stack.toml", "--target", "wif-pool"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/stack.toml")));
        match cli.command {
            Command::Plan(args) => assert_eq!(args.target.as_deref(), Some("wif-pool")),
            _ => panic!("expected plan"),
        }
    }
}
