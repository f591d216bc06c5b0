pub mod deploy;
pub mod graph;
pub mod outputs;
pub mod plan;

use anyhow::{Context as _, Result};

use crate::Context;
use crate::schema::DeployConfig;

/// Load and validate the deployment config, applying CLI overrides
pub fn load_config(ctx: &Context) -> Result<DeployConfig> {
    let mut config = DeployConfig::load(ctx.config.as_deref())?;
    if let Some(account) = &ctx.account {
        config.account.clone_from(account);
    }
    config.validate().context("Invalid deployment config")?;
    log::debug!(
        "deploying app {} to account {} ({} / {})",
        config.app,
        config.account,
        config.regions.primary,
        config.regions.edge
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(config: Option<std::path::PathBuf>, account: Option<&str>) -> Context {
        Context {
            verbose: 0,
            quiet: true,
            config,
            account: account.map(str::to_string),
        }
    }

    #[test]
    fn test_account_override() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("deploy.toml");
        let config = load_config(&ctx(Some(missing), Some("123456789012"))).unwrap();
        assert_eq!(config.account, "123456789012");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(&path, "account = \"123456789012\"\ndomain_name = \"not a domain\"\n")
            .unwrap();
        assert!(load_config(&ctx(Some(path), None)).is_err());
    }
}
