//! Core types for units, intents and execution

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::unit::AttributeRef;

/// Region that hosts global edge resources (CDN distributions, edge WAF ACLs,
/// viewer certificates).
pub const EDGE_REGION: &str = "us-east-1";

/// Account + region pair a unit's resources belong to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locality {
    pub account: String,
    pub region: String,
}

impl Locality {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

/// Value of a resource property or unit export
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// A concrete value known at declaration time
    Literal(String),
    /// Another unit's exported attribute
    Import(AttributeRef),
    /// An attribute of a resource declared earlier in the same unit
    Local { resource: String, attribute: String },
}

impl Value {
    /// Reference an attribute of another resource in the same unit
    pub fn local(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Local {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// The imported reference, if this value crosses a unit boundary
    pub fn as_import(&self) -> Option<&AttributeRef> {
        match self {
            Self::Import(reference) => Some(reference),
            _ => None,
        }
    }

    /// The literal text, if known at declaration time
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Literal(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<AttributeRef> for Value {
    fn from(reference: AttributeRef) -> Self {
        Self::Import(reference)
    }
}

impl From<&AttributeRef> for Value {
    fn from(reference: &AttributeRef) -> Self {
        Self::Import(reference.clone())
    }
}

/// Managed resource types a provider knows how to realize
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Trail,
    ThreatDetector,
    SecurityHub,
    SecurityStandard,
    Budget,
    Vpc,
    Secret,
    SecurityGroup,
    DatabaseInstance,
    HostedZone,
    Certificate,
    Cluster,
    LogGroup,
    LoadBalancer,
    Listener,
    TargetGroup,
    DnsRecord,
    FileSystem,
    AccessPoint,
    TaskDefinition,
    Service,
    ScalingPolicy,
    WebAcl,
    Distribution,
}

impl ResourceKind {
    /// Snake-case name used in reports and ledgers
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Trail => "trail",
            Self::ThreatDetector => "threat_detector",
            Self::SecurityHub => "security_hub",
            Self::SecurityStandard => "security_standard",
            Self::Budget => "budget",
            Self::Vpc => "vpc",
            Self::Secret => "secret",
            Self::SecurityGroup => "security_group",
            Self::DatabaseInstance => "database_instance",
            Self::HostedZone => "hosted_zone",
            Self::Certificate => "certificate",
            Self::Cluster => "cluster",
            Self::LogGroup => "log_group",
            Self::LoadBalancer => "load_balancer",
            Self::Listener => "listener",
            Self::TargetGroup => "target_group",
            Self::DnsRecord => "dns_record",
            Self::FileSystem => "file_system",
            Self::AccessPoint => "access_point",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::ScalingPolicy => "scaling_policy",
            Self::WebAcl => "web_acl",
            Self::Distribution => "distribution",
        }
    }

    /// Short prefix for physical ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Bucket => "bkt",
            Self::Trail => "trail",
            Self::ThreatDetector => "det",
            Self::SecurityHub => "hub",
            Self::SecurityStandard => "std",
            Self::Budget => "budget",
            Self::Vpc => "vpc",
            Self::Secret => "secret",
            Self::SecurityGroup => "sg",
            Self::DatabaseInstance => "db",
            Self::HostedZone => "zone",
            Self::Certificate => "cert",
            Self::Cluster => "cluster",
            Self::LogGroup => "lg",
            Self::LoadBalancer => "alb",
            Self::Listener => "lsn",
            Self::TargetGroup => "tg",
            Self::DnsRecord => "rec",
            Self::FileSystem => "fs",
            Self::AccessPoint => "fsap",
            Self::TaskDefinition => "td",
            Self::Service => "svc",
            Self::ScalingPolicy => "scale",
            Self::WebAcl => "acl",
            Self::Distribution => "dist",
        }
    }

    /// Service namespace used in ARNs
    pub fn service(&self) -> &'static str {
        match self {
            Self::Bucket => "s3",
            Self::Trail => "cloudtrail",
            Self::ThreatDetector => "guardduty",
            Self::SecurityHub | Self::SecurityStandard => "securityhub",
            Self::Budget => "budgets",
            Self::Vpc | Self::SecurityGroup => "ec2",
            Self::Secret => "secretsmanager",
            Self::DatabaseInstance => "rds",
            Self::HostedZone | Self::DnsRecord => "route53",
            Self::Certificate => "acm",
            Self::Cluster | Self::TaskDefinition | Self::Service => "ecs",
            Self::LogGroup => "logs",
            Self::LoadBalancer | Self::Listener | Self::TargetGroup => "elasticloadbalancing",
            Self::FileSystem | Self::AccessPoint => "elasticfilesystem",
            Self::ScalingPolicy => "application-autoscaling",
            Self::WebAcl => "wafv2",
            Self::Distribution => "cloudfront",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state of one managed resource
///
/// Intents are plain data. Nothing is provisioned until the orchestrator
/// resolves the intent's values and submits it to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIntent {
    /// Identifier unique within the unit
    pub logical_id: String,
    pub kind: ResourceKind,
    pub properties: BTreeMap<String, Value>,
    /// Explicit region pin; must match the unit's region
    pub region: Option<String>,
}

impl ResourceIntent {
    pub fn new(logical_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind,
            properties: BTreeMap::new(),
            region: None,
        }
    }

    /// Set a property
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Pin the intent to a region
    pub fn pinned_to(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Region the resource kind itself demands, if any
    pub fn required_region(&self) -> Option<&'static str> {
        match self.kind {
            ResourceKind::Distribution => Some(EDGE_REGION),
            ResourceKind::WebAcl
                if self
                    .properties
                    .get("scope")
                    .and_then(Value::as_literal)
                    .is_some_and(|scope| scope.eq_ignore_ascii_case("cloudfront")) =>
            {
                Some(EDGE_REGION)
            }
            _ => None,
        }
    }

    /// All values referenced by the intent, in property order
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// An intent with every value resolved, as submitted to a provider
///
/// Immutable once built; the fingerprint identifies the exact desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIntent {
    pub unit: String,
    pub logical_id: String,
    pub kind: ResourceKind,
    /// Deterministic name derived from app, unit and logical id
    pub physical_name: String,
    pub properties: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub fingerprint: String,
}

impl ResolvedIntent {
    pub fn new(
        unit: impl Into<String>,
        logical_id: impl Into<String>,
        kind: ResourceKind,
        physical_name: impl Into<String>,
        properties: BTreeMap<String, String>,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let physical_name = physical_name.into();
        let fingerprint = fingerprint(kind, &physical_name, &properties, &tags);
        Self {
            unit: unit.into(),
            logical_id: logical_id.into(),
            kind,
            physical_name,
            properties,
            tags,
            fingerprint,
        }
    }

    /// Get a resolved property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

fn fingerprint(
    kind: ResourceKind,
    physical_name: &str,
    properties: &BTreeMap<String, String>,
    tags: &BTreeMap<String, String>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(physical_name.as_bytes());
    hasher.update(&[0]);
    for (key, value) in properties {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(&[1]);
    for (key, value) in tags {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Result of applying one intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// Resource was created
    Created,
    /// Resource existed with a different fingerprint and was updated in place
    Updated,
    /// Resource already matched the intent; nothing was done
    Unchanged,
}

/// Resource-level counts for a unit or a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rolled_back: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated
    }

    /// Total number of resources applied
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.rolled_back += other.rolled_back;
    }

    /// Add an apply outcome to the summary
    pub fn add_outcome(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// How a consumer waits for a producer's export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Fail immediately when the export is not confirmed
    FailFast,
    /// Block until the export is confirmed or the timeout elapses
    Wait(Duration),
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self::Wait(Duration::from_secs(30))
    }
}

/// What happens to the rest of the run after a unit fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Finish the current wave, start no new wave
    #[default]
    HaltNewWaves,
    /// Keep deploying units that do not depend on the failure
    ContinueIndependent,
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of parallel units per wave
    pub jobs: usize,
    pub resolve_policy: ResolvePolicy,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            resolve_policy: ResolvePolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_fingerprint_tracks_desired_state() {
        let a = ResolvedIntent::new(
            "Network",
            "CmsVpc",
            ResourceKind::Vpc,
            "cms-network-cmsvpc",
            props(&[("max_azs", "2")]),
            BTreeMap::new(),
        );
        let same = ResolvedIntent::new(
            "Network",
            "CmsVpc",
            ResourceKind::Vpc,
            "cms-network-cmsvpc",
            props(&[("max_azs", "2")]),
            BTreeMap::new(),
        );
        let changed = ResolvedIntent::new(
            "Network",
            "CmsVpc",
            ResourceKind::Vpc,
            "cms-network-cmsvpc",
            props(&[("max_azs", "3")]),
            BTreeMap::new(),
        );
        assert_eq!(a.fingerprint, same.fingerprint);
        assert_ne!(a.fingerprint, changed.fingerprint);
    }

    #[test]
    fn test_edge_resources_require_edge_region() {
        let acl = ResourceIntent::new("WpWebAcl", ResourceKind::WebAcl).with("scope", "CLOUDFRONT");
        assert_eq!(acl.required_region(), Some(EDGE_REGION));

        let regional = ResourceIntent::new("Acl", ResourceKind::WebAcl).with("scope", "REGIONAL");
        assert_eq!(regional.required_region(), None);

        let cdn = ResourceIntent::new("Cdn", ResourceKind::Distribution);
        assert_eq!(cdn.required_region(), Some(EDGE_REGION));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add_outcome(ApplyOutcome::Created);
        summary.add_outcome(ApplyOutcome::Unchanged);
        summary.add_outcome(ApplyOutcome::Updated);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.total_changes(), 2);

        let mut total = ExecuteSummary::default();
        total.merge(&summary);
        total.merge(&summary);
        assert_eq!(total.created, 2);
    }
}
