//! Deployment context, cancellation and progress callbacks
//!
//! These keep the orchestrator free of ambient global state and of any
//! particular UI: naming and account values travel in a [`DeployContext`],
//! progress goes to a [`ProgressCallback`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::graph::Wave;
use crate::report::UnitStatus;
use crate::types::Locality;

/// Shared naming and account values passed to every unit declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployContext {
    /// Application name, used as the prefix of every physical name
    pub app: String,
    /// Default account for localities built from this context
    pub account: String,
    /// Tags applied to every unit
    pub tags: BTreeMap<String, String>,
}

impl DeployContext {
    pub fn new(app: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            account: account.into(),
            tags: BTreeMap::new(),
        }
    }

    /// Add a tag applied to every unit
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Locality in the context's account
    pub fn locality(&self, region: impl Into<String>) -> Locality {
        Locality::new(self.account.clone(), region)
    }

    /// Deterministic physical name for a resource
    ///
    /// The same app, unit and logical id always map to the same name, so
    /// re-running a deployment addresses the same resources.
    pub fn physical_name(&self, unit: &str, logical_id: &str) -> String {
        let key = format!("{}/{}/{}", self.app, unit, logical_id);
        let hash = blake3::hash(key.as_bytes()).to_hex();
        format!(
            "{}-{}-{}-{}",
            slug(&self.app),
            slug(unit),
            slug(logical_id),
            &hash.as_str()[..8]
        )
    }

    /// Name of the parameter that carries an export into other localities
    pub fn parameter_name(&self, producer: &str, key: &str) -> String {
        format!("/{}/exports/{}/{}", self.app, producer, key)
    }
}

fn slug(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Cooperative cancellation flag shared between the caller, the
/// orchestrator and in-flight units
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback for waved execution
///
/// Units inside a wave run in parallel, so unit completions are reported
/// after the wave barrier, in declaration order.
pub trait ProgressCallback: Send {
    /// Called before the units of a wave start
    fn on_wave_start(&mut self, wave: &Wave);

    /// Called once per unit with its terminal status
    fn on_unit_complete(&mut self, unit: &str, status: &UnitStatus);

    /// Called after a wave's exports are committed
    fn on_wave_complete(&mut self, wave: &Wave);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_wave_start(&mut self, _wave: &Wave) {}
    fn on_unit_complete(&mut self, _unit: &str, _status: &UnitStatus) {}
    fn on_wave_complete(&mut self, _wave: &Wave) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_names_are_stable_and_distinct() {
        let ctx = DeployContext::new("cms", "123456789012");
        let a = ctx.physical_name("CmsDatabaseStack", "WordpressRDS");
        assert_eq!(a, ctx.physical_name("CmsDatabaseStack", "WordpressRDS"));
        assert!(a.starts_with("cms-cmsdatabasestack-wordpressrds-"));
        assert_ne!(a, ctx.physical_name("CmsEcsStack", "WordpressRDS"));

        let other_app = DeployContext::new("blog", "123456789012");
        assert_ne!(a, other_app.physical_name("CmsDatabaseStack", "WordpressRDS"));
    }

    #[test]
    fn test_parameter_name() {
        let ctx = DeployContext::new("cms", "123456789012");
        assert_eq!(
            ctx.parameter_name("CmsEcsStack", "origin_hostname"),
            "/cms/exports/CmsEcsStack/origin_hostname"
        );
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
