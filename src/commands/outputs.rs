use anyhow::Result;

use crate::Context;
use crate::state::Ledger;
use crate::ui;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let config = super::load_config(ctx)?;
    let ledger = Ledger::load(&config.state_dir(), &config.app)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger.exports)?);
        return Ok(());
    }

    ui::header(&format!("Outputs: {}", config.app));
    let Some(last_run) = ledger.last_run else {
        ui::info("Nothing deployed yet. Run 'cmsdeploy deploy' first.");
        return Ok(());
    };
    ui::kv("Last deploy", &last_run.format("%Y-%m-%d %H:%M:%S UTC").to_string());

    for (unit, exports) in &ledger.exports {
        ui::section(unit);
        for (key, value) in exports {
            ui::kv(key, value);
        }
    }

    let unfinished: Vec<&String> = ledger
        .units
        .iter()
        .filter(|(_, record)| record.status != "completed")
        .map(|(name, _)| name)
        .collect();
    if !unfinished.is_empty() {
        println!();
        for name in unfinished {
            ui::warn(&format!("{name}: {}", ledger.units[name].status));
        }
    }
    println!();
    Ok(())
}
