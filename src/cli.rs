use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cmsdeploy")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy a WordPress CMS as ordered, cross-region infrastructure units", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deployment config file (default: ~/.config/cmsdeploy/deploy.toml)
    #[arg(short, long, global = true, env = "CMSDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target account, overriding the config file
    #[arg(long, global = true, env = "CMSDEPLOY_ACCOUNT")]
    pub account: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show waves, dependencies and cross-region references
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deploy every unit in wave order
    Deploy(DeployArgs),

    /// Show exports recorded by the last deploy
    Outputs {
        /// Print the exports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the dependency graph in Graphviz DOT format
    Graph,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Deploy Arguments
// ============================================================================

#[derive(Debug, clap::Args)]
pub struct DeployArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of units deployed in parallel within a wave
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Fail a cross-region import immediately instead of waiting
    #[arg(long, conflicts_with = "resolve_timeout")]
    pub fail_fast: bool,

    /// Seconds to wait for a cross-region export
    #[arg(long)]
    pub resolve_timeout: Option<u64>,

    /// Keep deploying units that do not depend on a failed one
    #[arg(short, long)]
    pub keep_going: bool,

    /// Print the deployment result as JSON
    #[arg(long)]
    pub json: bool,
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
    fn test_parse_deploy() {
        let cli = Cli::parse_from([
            "cmsdeploy",
            "-vv",
            "deploy",
            "--yes",
            "--jobs",
            "2",
            "--keep-going",
            "--resolve-timeout",
            "5",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert!(args.yes);
        assert!(args.keep_going);
        assert_eq!(args.jobs, Some(2));
        assert_eq!(args.resolve_timeout, Some(5));
        assert!(!args.fail_fast);
    }

    #[test]
    fn test_fail_fast_conflicts_with_timeout() {
        let parsed = Cli::try_parse_from([
            "cmsdeploy",
            "deploy",
            "--fail-fast",
            "--resolve-timeout",
            "5",
        ]);
        assert!(parsed.is_err());
    }
}
