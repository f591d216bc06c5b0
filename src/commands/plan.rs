use anyhow::{Context as _, Result};
use colored::Colorize;
use serde::Serialize;

use orchestrator::{CrossReference, Edge, Plan, Wave};

use crate::Context;
use crate::schema::DeployConfig;
use crate::stacks;
use crate::ui;

#[derive(Serialize)]
struct PlanView<'a> {
    app: &'a str,
    account: &'a str,
    waves: &'a [Wave],
    edges: Vec<&'a Edge>,
    cross_references: &'a [CrossReference],
}

/// Build the plan for a configuration without deploying anything
pub fn build(config: &DeployConfig) -> Result<Plan> {
    let deployment = stacks::catalog(config);
    Plan::build(deployment.units(), deployment.edges(), deployment.context())
        .context("Deployment failed planning")
}

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let config = super::load_config(ctx)?;
    let plan = build(&config)?;

    if json {
        let view = PlanView {
            app: &config.app,
            account: &config.account,
            waves: plan.waves(),
            edges: plan.graph().distinct_edges(),
            cross_references: plan.cross_references(),
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    show(&config, &plan, ctx.verbose > 0);
    Ok(())
}

/// Print the plan: waves, what each unit waits for, cross-region references
///
/// `detailed` also lists every boundary and resource of each unit.
pub fn show(config: &DeployConfig, plan: &Plan, detailed: bool) {
    ui::header(&format!("Deployment plan: {}", config.app));
    ui::kv("Account", &config.account);
    ui::kv("Primary region", &config.regions.primary);
    ui::kv("Edge region", &config.regions.edge);
    ui::kv("Domain", &config.domain_name);

    for wave in plan.waves() {
        ui::section(&format!("Wave {}", wave.index));
        for name in &wave.units {
            let Some(unit) = plan.unit(name) else {
                continue;
            };
            println!(
                "  {} {} {}",
                "•".cyan(),
                name.bold(),
                format!(
                    "({}, {} resources, {} boundaries)",
                    unit.locality,
                    unit.intents.len(),
                    unit.boundaries.len()
                )
                .dimmed()
            );
            for edge in plan
                .graph()
                .distinct_edges()
                .into_iter()
                .filter(|edge| &edge.consumer == name)
            {
                ui::dim(&format!("  after {} ({})", edge.producer, edge.reason));
            }
            if detailed {
                for boundary in &unit.boundaries {
                    ui::dim(&format!("  security_group {}", boundary.name));
                }
                for intent in &unit.intents {
                    ui::dim(&format!("  {} {}", intent.kind, intent.logical_id));
                }
            }
        }
    }

    if !plan.cross_references().is_empty() {
        ui::section("Cross-region references");
        for cross in plan.cross_references() {
            println!(
                "  {} {} {} {}",
                cross.reference.to_string().bold(),
                "→".dimmed(),
                cross.consumer,
                format!(
                    "via {} ({} → {})",
                    cross.parameter, cross.producer_locality.region, cross.consumer_locality.region
                )
                .dimmed()
            );
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_plan() {
        let config = DeployConfig {
            account: "123456789012".to_string(),
            ..DeployConfig::default()
        };
        let plan = build(&config).unwrap();
        assert_eq!(plan.waves().len(), 5);

        let edges = plan.graph().distinct_edges();
        assert!(edges.iter().any(|edge| edge.producer == stacks::GOVERNANCE
            && edge.consumer == stacks::NETWORK));
    }

    #[test]
    fn test_plan_view_serializes() {
        let config = DeployConfig {
            account: "123456789012".to_string(),
            ..DeployConfig::default()
        };
        let plan = build(&config).unwrap();
        let view = PlanView {
            app: &config.app,
            account: &config.account,
            waves: plan.waves(),
            edges: plan.graph().distinct_edges(),
            cross_references: plan.cross_references(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["waves"][4]["units"][0], stacks::EDGE);
        assert_eq!(
            json["cross_references"][0]["parameter"],
            "/cms/exports/CmsEcsStack/origin_hostname"
        );
    }
}
