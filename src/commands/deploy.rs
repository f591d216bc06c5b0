use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use dialoguer::Confirm;
use std::time::Duration;

use orchestrator::{
    DeploymentResult, ExecuteOptions, FailurePolicy, MemoryProvider, Orchestrator, ResolvePolicy,
};

use crate::Context;
use crate::cli::DeployArgs;
use crate::progress::WaveProgress;
use crate::schema::ExecutionConfig;
use crate::state::Ledger;
use crate::{stacks, ui};

pub fn run(ctx: &Context, args: DeployArgs) -> Result<()> {
    let config = super::load_config(ctx)?;
    let plan = super::plan::build(&config)?;
    let interactive = !args.json && !ctx.quiet;

    if interactive {
        super::plan::show(&config, &plan, ctx.verbose > 0);
    }

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Deploy {} units to account {}?",
                plan.units().len(),
                config.account
            ))
            .default(true)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            ui::info("Deploy cancelled");
            return Ok(());
        }
    }

    let state_dir = config.state_dir();
    let mut ledger = Ledger::load(&state_dir, &config.app)?;
    let provider = MemoryProvider::with_records(ledger.resources.clone());

    let options = execute_options(&config.execution, &args);
    log::info!(
        "executing {} waves with {} jobs ({:?}, {:?})",
        plan.waves().len(),
        options.jobs,
        options.resolve_policy,
        options.failure_policy
    );

    let mut progress = if interactive {
        WaveProgress::new(plan.waves().len())
    } else {
        WaveProgress::hidden(plan.waves().len())
    };
    let result = Orchestrator::new(&provider, stacks::context(&config))
        .with_options(options)
        .execute(&plan, &mut progress);

    ledger.record_run(&result, provider.snapshot(), config.digest()?);
    ledger.save(&state_dir)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !ctx.quiet {
        show_result(&result);
    }

    if !result.is_success() {
        match &result.error {
            Some(error) => bail!("Deployment failed: {error}"),
            None => bail!("Deployment failed"),
        }
    }
    Ok(())
}

/// Execution options from the config, overridden by command-line flags
fn execute_options(config: &ExecutionConfig, args: &DeployArgs) -> ExecuteOptions {
    let mut options = config.options();
    if let Some(jobs) = args.jobs {
        options.jobs = jobs.max(1);
    }
    if args.fail_fast {
        options.resolve_policy = ResolvePolicy::FailFast;
    } else if let Some(secs) = args.resolve_timeout {
        options.resolve_policy = ResolvePolicy::Wait(Duration::from_secs(secs));
    }
    if args.keep_going {
        options.failure_policy = FailurePolicy::ContinueIndependent;
    }
    options
}

fn show_result(result: &DeploymentResult) {
    ui::header("Deployment result");
    for report in &result.units {
        ui::unit_line(report);
    }

    let (completed, failed, skipped) = result.counts();
    println!();
    ui::kv("Resources", &ui::format_summary(&result.summary));
    ui::kv(
        "Units",
        &format!(
            "{} completed, {} failed, {} skipped",
            completed.to_string().green(),
            if failed > 0 {
                failed.to_string().red()
            } else {
                failed.to_string().dimmed()
            },
            if skipped > 0 {
                skipped.to_string().yellow()
            } else {
                skipped.to_string().dimmed()
            }
        ),
    );

    if let Some(domain) = result
        .exports
        .get(stacks::EDGE)
        .and_then(|exports| exports.get("distribution_domain"))
    {
        ui::kv("Distribution", domain);
    }
    if let Some(origin) = result
        .exports
        .get(stacks::COMPUTE)
        .and_then(|exports| exports.get(stacks::compute::ORIGIN_HOSTNAME))
    {
        ui::kv("Origin", origin);
    }

    println!();
    if result.is_success() {
        ui::success("All units deployed");
    } else if let Some(error) = &result.error {
        ui::error(&error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OnFailure;

    fn args() -> DeployArgs {
        DeployArgs {
            yes: true,
            jobs: None,
            fail_fast: false,
            resolve_timeout: None,
            keep_going: false,
            json: false,
        }
    }

    #[test]
    fn test_options_default_to_config() {
        let config = ExecutionConfig {
            jobs: 3,
            resolve_timeout_secs: 10,
            on_failure: OnFailure::ContinueIndependent,
        };
        let options = execute_options(&config, &args());
        assert_eq!(options.jobs, 3);
        assert_eq!(options.resolve_policy, ResolvePolicy::Wait(Duration::from_secs(10)));
        assert_eq!(options.failure_policy, FailurePolicy::ContinueIndependent);
    }

    #[test]
    fn test_flags_override_config() {
        let config = ExecutionConfig::default();
        let options = execute_options(
            &config,
            &DeployArgs {
                jobs: Some(0),
                fail_fast: true,
                keep_going: true,
                ..args()
            },
        );
        assert_eq!(options.jobs, 1);
        assert_eq!(options.resolve_policy, ResolvePolicy::FailFast);
        assert_eq!(options.failure_policy, FailurePolicy::ContinueIndependent);

        let options = execute_options(
            &config,
            &DeployArgs {
                resolve_timeout: Some(2),
                ..args()
            },
        );
        assert_eq!(options.resolve_policy, ResolvePolicy::Wait(Duration::from_secs(2)));
        assert_eq!(options.failure_policy, FailurePolicy::HaltNewWaves);
    }

    #[test]
    fn test_deploy_records_ledger_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("deploy.toml");
        let state_dir = dir.path().join("state");
        std::fs::write(
            &config_path,
            format!(
                "account = \"123456789012\"\nstate_dir = \"{}\"\n",
                state_dir.display()
            ),
        )
        .unwrap();
        let ctx = Context {
            verbose: 0,
            quiet: true,
            config: Some(config_path),
            account: None,
        };

        run(&ctx, args()).unwrap();
        let first = Ledger::load(&state_dir, "cms").unwrap();
        assert!(first.last_run.is_some());
        assert_eq!(first.units.len(), 5);
        assert_eq!(
            first.exports[stacks::COMPUTE][stacks::compute::ORIGIN_HOSTNAME],
            "origin.domain.com"
        );

        run(&ctx, args()).unwrap();
        let second = Ledger::load(&state_dir, "cms").unwrap();
        assert_eq!(second.resources, first.resources);
        assert!(second.units.values().all(|record| record.created == 0
            && record.updated == 0
            && record.unchanged > 0));
    }
}
