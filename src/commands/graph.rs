use anyhow::Result;

use crate::Context;

/// Print the unit graph as Graphviz DOT, one cluster per wave
pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_config(ctx)?;
    let plan = super::plan::build(&config)?;
    print!("{}", orchestrator::to_dot(plan.graph(), plan.waves()));
    Ok(())
}
