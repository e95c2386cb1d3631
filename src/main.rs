mod cli;
mod commands;
mod config;
mod hub;
mod paths;
mod progress;
mod sandbox;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use reconcile::CancelToken;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub state: Option<PathBuf>,
    /// Set by Ctrl-C; the engine stops before the next wave
    pub cancel: CancelToken,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state: cli.state,
        cancel: install_interrupt_handler(),
    };

    match run(&ctx, cli.command) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<ExitCode> {
    match command {
        Command::Plan(args) => commands::plan::run(ctx, &args),
        Command::Apply(args) => commands::apply::run(ctx, &args),
        Command::Destroy { yes } => commands::destroy::run(ctx, yes),
        Command::Outputs { json } => {
            commands::outputs::run(ctx, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "hubstrap", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// First Ctrl-C lets in-flight operations finish; a second one exits at once.
fn install_interrupt_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if handler.is_cancelled() {
            std::process::exit(130);
        }
        handler.cancel();
        ui::warn("Interrupted: finishing in-flight operations (Ctrl-C again to abort)");
    });
    if let Err(e) = installed {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }
    cancel
}
