use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use orchestrator::{DeploymentResult, StoredHandle};

// ============================================================================
// Ledger Structures
// ============================================================================

/// Record of everything deployed for one app
///
/// The resource handles make re-running a deploy idempotent; exports and
/// unit statuses describe the last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub app: String,

    /// When the last deploy finished
    pub last_run: Option<DateTime<Utc>>,

    /// Digest of the configuration used by the last deploy
    #[serde(default)]
    pub config_digest: String,

    /// Committed exports per unit
    #[serde(default)]
    pub exports: BTreeMap<String, BTreeMap<String, String>>,

    /// Terminal state of each unit in the last run
    #[serde(default)]
    pub units: BTreeMap<String, UnitRecord>,

    /// Every resource handle recorded by the provider
    #[serde(default)]
    pub resources: Vec<StoredHandle>,
}

/// Last known state of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub locality: String,
    pub wave: Option<usize>,
    pub status: String,
    #[serde(default)]
    pub created: usize,
    #[serde(default)]
    pub updated: usize,
    #[serde(default)]
    pub unchanged: usize,
}

// ============================================================================
// Ledger Implementation
// ============================================================================

impl Ledger {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            last_run: None,
            config_digest: String::new(),
            exports: BTreeMap::new(),
            units: BTreeMap::new(),
            resources: Vec::new(),
        }
    }

    /// Ledger file for an app inside the state directory
    pub fn path(state_dir: &Path, app: &str) -> PathBuf {
        state_dir.join(format!("{app}.toml"))
    }

    /// Load the ledger, or an empty one if the app was never deployed
    pub fn load(state_dir: &Path, app: &str) -> Result<Self> {
        let path = Self::path(state_dir, app);

        if !path.exists() {
            log::debug!("Ledger {} does not exist, starting empty", path.display());
            return Ok(Self::new(app));
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read ledger: {}", path.display()))?;

        let ledger: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse ledger: {}", path.display()))?;

        log::debug!(
            "Loaded ledger from {} ({} resources)",
            path.display(),
            ledger.resources.len()
        );
        Ok(ledger)
    }

    /// Save the ledger to disk
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        fs::create_dir_all(state_dir).with_context(|| {
            format!("Failed to create state directory: {}", state_dir.display())
        })?;

        let path = Self::path(state_dir, &self.app);
        let content = toml::to_string_pretty(&self).context("Failed to serialize ledger to TOML")?;

        fs::write(&path, &content)
            .with_context(|| format!("Failed to write ledger: {}", path.display()))?;

        log::debug!("Saved ledger to {}", path.display());
        Ok(())
    }

    /// Fold a finished run into the ledger
    ///
    /// Exports of units that did not complete keep their previous values.
    pub fn record_run(
        &mut self,
        result: &DeploymentResult,
        resources: Vec<StoredHandle>,
        config_digest: String,
    ) {
        for report in &result.units {
            self.units.insert(
                report.name.clone(),
                UnitRecord {
                    locality: report.locality.to_string(),
                    wave: report.wave,
                    status: report.status.to_string(),
                    created: report.summary.created,
                    updated: report.summary.updated,
                    unchanged: report.summary.unchanged,
                },
            );
        }
        for (unit, exports) in &result.exports {
            self.exports.insert(unit.clone(), exports.clone());
        }
        self.resources = resources;
        self.config_digest = config_digest;
        self.last_run = Some(Utc::now());
    }
}

// ============================================================================
// Tests
// ============================================================================
