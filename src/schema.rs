use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use orchestrator::{ExecuteOptions, FailurePolicy, ResolvePolicy};

static APP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,30}$").expect("valid app pattern"));
static ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{12}$").expect("valid account pattern"));
static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d$").expect("valid region pattern"));
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,}$").expect("valid domain pattern")
});
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));
static ACM_ARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws:acm:([a-z0-9-]+):(\d{12})?(:certificate/[0-9a-f-]+)?$")
        .expect("valid certificate ARN pattern")
});

// ============================================================================
// Main Config Schema
// ============================================================================

/// Deployment configuration
///
/// Every field has a default, so a missing file deploys the stock CMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Application name, prefix of every physical name
    pub app: String,

    /// Target account for every unit
    pub account: String,

    /// Apex domain served by the distribution
    pub domain_name: String,

    /// Address that receives budget alerts
    pub budget_email: String,

    /// Where the ledger lives; `~` is expanded
    pub state_dir: String,

    pub regions: RegionsConfig,
    pub certificates: CertificatesConfig,
    pub budget: BudgetConfig,
    pub database: DatabaseConfig,
    pub compute: ComputeConfig,
    pub execution: ExecutionConfig,

    /// Tags applied to every unit
    pub tags: BTreeMap<String, String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            app: "cms".to_string(),
            account: "000000000000".to_string(),
            domain_name: "domain.com".to_string(),
            budget_email: "owner@example.com".to_string(),
            state_dir: "~/.local/state/cmsdeploy".to_string(),
            regions: RegionsConfig::default(),
            certificates: CertificatesConfig::default(),
            budget: BudgetConfig::default(),
            database: DatabaseConfig::default(),
            compute: ComputeConfig::default(),
            execution: ExecutionConfig::default(),
            tags: BTreeMap::new(),
        }
    }
}

impl DeployConfig {
    /// Default config path (~/.config/cmsdeploy/deploy.toml)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("cmsdeploy").join("deploy.toml"))
    }

    /// Load the config from `path`, or the default path when `None`
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => {
                let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
                PathBuf::from(expanded)
            }
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            log::debug!(
                "Config file {} does not exist, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Could not read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", config_path.display()))?;
        log::debug!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !APP_RE.is_match(&self.app) {
            anyhow::bail!(
                "Invalid app name '{}': use lowercase letters, digits and dashes",
                self.app
            );
        }
        if !ACCOUNT_RE.is_match(&self.account) {
            anyhow::bail!("Invalid account '{}': expected 12 digits", self.account);
        }
        if !DOMAIN_RE.is_match(&self.domain_name) {
            anyhow::bail!("Invalid domain name '{}'", self.domain_name);
        }
        if !EMAIL_RE.is_match(&self.budget_email) {
            anyhow::bail!("Invalid budget email '{}'", self.budget_email);
        }
        if self.state_dir.is_empty() {
            anyhow::bail!("State directory cannot be empty");
        }

        self.regions.validate()?;
        self.certificates.validate()?;
        self.budget.validate()?;
        self.compute.validate()?;
        self.execution.validate()?;

        Ok(())
    }

    /// State directory with `~` expanded
    pub fn state_dir(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.state_dir);
        PathBuf::from(expanded.as_ref())
    }

    /// Stable digest of the configuration, recorded with each deploy
    pub fn digest(&self) -> Result<String> {
        let content = toml::to_string(self).context("Failed to serialize config")?;
        Ok(blake3::hash(content.as_bytes()).to_hex().to_string())
    }
}

// ============================================================================
// Regions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionsConfig {
    /// Region of the governance, network, database and compute units
    pub primary: String,

    /// Region of the edge unit; CDN resources only live here
    pub edge: String,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        Self {
            primary: "ap-southeast-2".to_string(),
            edge: orchestrator::EDGE_REGION.to_string(),
        }
    }
}

impl RegionsConfig {
    pub fn validate(&self) -> Result<()> {
        for region in [&self.primary, &self.edge] {
            if !REGION_RE.is_match(region) {
                anyhow::bail!("Invalid region '{region}'");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Certificates
// ============================================================================

/// Certificates that must already exist for the domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificatesConfig {
    /// Viewer certificate used by the distribution (edge region)
    pub viewer_arn: String,

    /// Certificate for origin.<domain> on the load balancer (primary region)
    pub origin_arn: String,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            viewer_arn: "arn:aws:acm:us-east-1:".to_string(),
            origin_arn: "arn:aws:acm:ap-southeast-2:".to_string(),
        }
    }
}

impl CertificatesConfig {
    pub fn validate(&self) -> Result<()> {
        for arn in [&self.viewer_arn, &self.origin_arn] {
            if !ACM_ARN_RE.is_match(arn) {
                anyhow::bail!("Invalid certificate ARN '{arn}'");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Budget
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Monthly cost limit in USD
    pub monthly_limit_usd: u32,

    /// Alert when actual spend passes this percentage of the limit
    pub alert_threshold_percent: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit_usd: 50,
            alert_threshold_percent: 80,
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.monthly_limit_usd == 0 {
            anyhow::bail!("Budget limit must be positive");
        }
        if !(1..=100).contains(&self.alert_threshold_percent) {
            anyhow::bail!(
                "Budget alert threshold must be between 1 and 100, got {}",
                self.alert_threshold_percent
            );
        }
        Ok(())
    }
}

// ============================================================================
// Database
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub instance_type: String,
    pub engine_version: String,
    pub allocated_storage_gib: u32,
    pub max_allocated_storage_gib: u32,
    pub backup_retention_days: u32,
    pub multi_az: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            instance_type: "t4g.small".to_string(),
            engine_version: "8.0".to_string(),
            allocated_storage_gib: 20,
            max_allocated_storage_gib: 100,
            backup_retention_days: 14,
            multi_az: true,
        }
    }
}

// ============================================================================
// Compute
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub image: String,
    pub cpu: u32,
    pub memory_mib: u32,
    pub desired_count: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub target_cpu_percent: u32,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            image: "wordpress:6.8.1".to_string(),
            cpu: 512,
            memory_mib: 1024,
            desired_count: 2,
            min_capacity: 2,
            max_capacity: 6,
            target_cpu_percent: 55,
        }
    }
}

impl ComputeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            anyhow::bail!("Container image cannot be empty");
        }
        if self.min_capacity > self.max_capacity {
            anyhow::bail!(
                "min_capacity ({}) exceeds max_capacity ({})",
                self.min_capacity,
                self.max_capacity
            );
        }
        if !(self.min_capacity..=self.max_capacity).contains(&self.desired_count) {
            anyhow::bail!(
                "desired_count ({}) must be between min_capacity and max_capacity",
                self.desired_count
            );
        }
        Ok(())
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnFailure {
    /// Finish the running wave and stop
    Halt,
    /// Keep deploying units that do not depend on the failure
    ContinueIndependent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Parallel units per wave
    pub jobs: usize,

    /// Seconds to wait for a cross-region export; 0 fails fast
    pub resolve_timeout_secs: u64,

    pub on_failure: OnFailure,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            resolve_timeout_secs: 30,
            on_failure: OnFailure::Halt,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            anyhow::bail!("jobs must be at least 1");
        }
        Ok(())
    }

    /// Orchestrator options for this configuration
    pub fn options(&self) -> ExecuteOptions {
        ExecuteOptions {
            jobs: self.jobs,
            resolve_policy: if self.resolve_timeout_secs == 0 {
                ResolvePolicy::FailFast
            } else {
                ResolvePolicy::Wait(Duration::from_secs(self.resolve_timeout_secs))
            },
            failure_policy: match self.on_failure {
                OnFailure::Halt => FailurePolicy::HaltNewWaves,
                OnFailure::ContinueIndependent => FailurePolicy::ContinueIndependent,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_deployment() {
        let config = DeployConfig::default();
        assert_eq!(config.domain_name, "domain.com");
        assert_eq!(config.budget_email, "owner@example.com");
        assert_eq!(config.regions.primary, "ap-southeast-2");
        assert_eq!(config.regions.edge, "us-east-1");
        assert_eq!(config.budget.monthly_limit_usd, 50);
        assert_eq!(config.database.instance_type, "t4g.small");
        assert_eq!(config.compute.image, "wordpress:6.8.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
app = "blog"
account = "123456789012"
domain_name = "example.org"

[compute]
desired_count = 3

[execution]
jobs = 2
resolve_timeout_secs = 0
on_failure = "continue-independent"

[tags]
Owner = "platform"
"#;
        let config: DeployConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.app, "blog");
        assert_eq!(config.compute.desired_count, 3);
        assert_eq!(config.compute.cpu, 512);
        assert_eq!(config.regions.primary, "ap-southeast-2");
        assert_eq!(config.tags.get("Owner").map(String::as_str), Some("platform"));
        assert!(config.validate().is_ok());

        let options = config.execution.options();
        assert_eq!(options.jobs, 2);
        assert_eq!(options.resolve_policy, ResolvePolicy::FailFast);
        assert_eq!(options.failure_policy, FailurePolicy::ContinueIndependent);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = DeployConfig::default();
        config.account = "12345".to_string();
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.regions.edge = "useast1".to_string();
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.compute.min_capacity = 8;
        assert!(config.validate().is_err());

        let mut config = DeployConfig::default();
        config.certificates.origin_arn = "not-an-arn".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeployConfig::load(Some(&dir.path().join("missing.toml"))).unwrap();
        assert_eq!(config, DeployConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.toml");
        std::fs::write(&path, "app = \"shop\"\n[budget]\nmonthly_limit_usd = 120\n").unwrap();

        let config = DeployConfig::load(Some(&path)).unwrap();
        assert_eq!(config.app, "shop");
        assert_eq!(config.budget.monthly_limit_usd, 120);
        assert_eq!(config.budget.alert_threshold_percent, 80);
    }

    #[test]
    fn test_digest_tracks_changes() {
        let a = DeployConfig::default();
        let mut b = DeployConfig::default();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        b.compute.desired_count = 3;
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }
}
