mod cli;
mod commands;
mod progress;
mod schema;
mod stacks;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub account: Option<String>,
}

fn main() -> Result<()> {
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
        account: cli.account,
    };

    match cli.command {
        Command::Plan { json } => commands::plan::run(&ctx, json),
        Command::Deploy(args) => commands::deploy::run(&ctx, args),
        Command::Outputs { json } => commands::outputs::run(&ctx, json),
        Command::Graph => commands::graph::run(&ctx),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "cmsdeploy", &mut io::stdout());
            Ok(())
        }
    }
}
