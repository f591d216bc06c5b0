//! Units and the declaration builder
//!
//! A unit is a named, independently deployable bundle of resource intents
//! with a target locality and a set of exported attributes. Declaring a unit
//! only records data; nothing is provisioned until the orchestrator runs it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use crate::boundary::SecurityBoundary;
use crate::context::DeployContext;
use crate::error::{Error, Result};
use crate::graph::Edge;
use crate::types::{Locality, ResourceIntent, Value};

static ARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:([a-z0-9-]+):([a-z0-9-]*):(\d*)").expect("valid ARN pattern")
});

/// Reference to an exported attribute of a unit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeRef {
    pub unit: String,
    pub key: String,
}

impl AttributeRef {
    pub fn new(unit: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            key: key.into(),
        }
    }

    /// Use the referenced export as a property value in another unit
    pub fn import(&self) -> Value {
        Value::Import(self.clone())
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unit, self.key)
    }
}

/// Handle to a unit declared in a [`Deployment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitHandle(usize);

impl UnitHandle {
    /// Declaration index of the unit
    pub fn index(self) -> usize {
        self.0
    }
}

/// A named, independently deployable bundle of resource intents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    pub locality: Locality,
    /// Applied in order, after the boundaries
    pub intents: Vec<ResourceIntent>,
    pub boundaries: Vec<SecurityBoundary>,
    pub exports: BTreeMap<String, Value>,
    pub tags: BTreeMap<String, String>,
}

impl Unit {
    pub fn new(name: impl Into<String>, locality: Locality, intents: Vec<ResourceIntent>) -> Self {
        Self {
            name: name.into(),
            locality,
            intents,
            boundaries: Vec::new(),
            exports: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_boundary(mut self, boundary: SecurityBoundary) -> Self {
        self.boundaries.push(boundary);
        self
    }

    pub fn with_export(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.exports.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Every export of another unit this unit consumes, first use first
    pub fn imports(&self) -> Vec<AttributeRef> {
        let boundary_values = self.boundaries.iter().flat_map(SecurityBoundary::values);
        let intent_values = self
            .intents
            .iter()
            .flat_map(|intent| intent.properties.values().cloned());
        let export_values = self.exports.values().cloned();

        let mut seen = HashSet::new();
        boundary_values
            .chain(intent_values)
            .chain(export_values)
            .filter_map(|value| value.as_import().cloned())
            .filter(|reference| seen.insert(reference.clone()))
            .collect()
    }

    /// Validate the unit on its own: unique resources, locality, same-unit
    /// references and boundary rules
    pub fn validate(&self) -> Result<()> {
        let mut declared: Vec<&str> = Vec::new();

        for boundary in &self.boundaries {
            self.check_unique(&declared, &boundary.name)?;
            boundary.validate(&self.name, &declared)?;
            for value in boundary.values() {
                self.check_local(&boundary.name, &value, &declared)?;
            }
            declared.push(&boundary.name);
        }

        for intent in &self.intents {
            self.check_unique(&declared, &intent.logical_id)?;
            self.check_locality(intent)?;
            for value in intent.properties.values() {
                self.check_local(&intent.logical_id, value, &declared)?;
            }
            declared.push(&intent.logical_id);
        }

        for (key, value) in &self.exports {
            self.check_local(&format!("export {key}"), value, &declared)?;
        }

        Ok(())
    }

    fn check_unique(&self, declared: &[&str], id: &str) -> Result<()> {
        if declared.contains(&id) {
            return Err(Error::DuplicateResource {
                unit: self.name.clone(),
                resource: id.to_string(),
            });
        }
        Ok(())
    }

    fn check_local(&self, owner: &str, value: &Value, declared: &[&str]) -> Result<()> {
        if let Value::Local { resource, .. } = value
            && !declared.contains(&resource.as_str())
        {
            return Err(Error::UnknownResource {
                unit: self.name.clone(),
                resource: owner.to_string(),
                target: resource.clone(),
            });
        }
        Ok(())
    }

    fn check_locality(&self, intent: &ResourceIntent) -> Result<()> {
        let mismatch = |account: &str, region: &str| Error::LocalityMismatch {
            unit: self.name.clone(),
            resource: intent.logical_id.clone(),
            expected: Locality::new(account, region).to_string(),
            actual: self.locality.to_string(),
        };

        if let Some(region) = &intent.region
            && region != &self.locality.region
        {
            return Err(mismatch(&self.locality.account, region));
        }

        if let Some(region) = intent.required_region()
            && region != self.locality.region
        {
            return Err(mismatch(&self.locality.account, region));
        }

        for (_, value) in intent.values() {
            let Some(caps) = value.as_literal().and_then(|text| ARN_RE.captures(text)) else {
                continue;
            };
            let region = if caps[2].is_empty() {
                self.locality.region.as_str()
            } else {
                &caps[2]
            };
            let account = if caps[3].is_empty() {
                self.locality.account.as_str()
            } else {
                &caps[3]
            };
            if region != self.locality.region || account != self.locality.account {
                return Err(mismatch(account, region));
            }
        }

        Ok(())
    }
}

/// Declaration builder used by a composition root
///
/// `declare` is pure: it records a node and returns a handle. Duplicate
/// names and other mistakes are reported when the orchestrator plans the
/// deployment, before any provider is called.
///
/// Handles index into the deployment that issued them. Passing a handle to
/// another deployment panics.
#[derive(Debug, Clone)]
pub struct Deployment {
    context: DeployContext,
    units: Vec<Unit>,
    edges: Vec<Edge>,
}

impl Deployment {
    pub fn new(context: DeployContext) -> Self {
        Self {
            context,
            units: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn context(&self) -> &DeployContext {
        &self.context
    }

    /// Declare a unit with its locality and intents
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        locality: Locality,
        intents: Vec<ResourceIntent>,
    ) -> UnitHandle {
        self.add(Unit::new(name, locality, intents))
    }

    /// Add a fully built unit; context tags apply unless the unit overrides them
    pub fn add(&mut self, mut unit: Unit) -> UnitHandle {
        for (key, value) in &self.context.tags {
            unit.tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.units.push(unit);
        UnitHandle(self.units.len() - 1)
    }

    /// Export an attribute of a unit and return a reference consumers can import
    ///
    /// # Panics
    ///
    /// Panics if `unit` was issued by another deployment.
    pub fn export(
        &mut self,
        unit: UnitHandle,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> AttributeRef {
        let key = key.into();
        let unit = &mut self.units[unit.0];
        unit.exports.insert(key.clone(), value.into());
        AttributeRef::new(&unit.name, key)
    }

    /// Declare an explicit ordering edge: `consumer` deploys after `producer`
    ///
    /// # Panics
    ///
    /// Panics if either handle was issued by another deployment.
    pub fn depends_on(&mut self, consumer: UnitHandle, producer: UnitHandle) {
        self.edges.push(Edge::explicit(
            &self.units[producer.0].name,
            &self.units[consumer.0].name,
        ));
    }

    /// # Panics
    ///
    /// Panics if `handle` was issued by another deployment.
    pub fn unit(&self, handle: UnitHandle) -> &Unit {
        &self.units[handle.0]
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{Peer, Port};
    use crate::types::ResourceKind;

    fn syd() -> Locality {
        Locality::new("123456789012", "ap-southeast-2")
    }

    #[test]
    fn test_declare_records_without_side_effects() {
        let ctx = DeployContext::new("cms", "123456789012").with_tag("Project", "cms");
        let mut deployment = Deployment::new(ctx);
        let net = deployment.declare(
            "Network",
            syd(),
            vec![ResourceIntent::new("CmsVpc", ResourceKind::Vpc)],
        );
        let vpc = deployment.export(net, "vpc_id", Value::local("CmsVpc", "id"));

        assert_eq!(vpc, AttributeRef::new("Network", "vpc_id"));
        assert_eq!(deployment.unit(net).tags.get("Project").map(String::as_str), Some("cms"));
        assert_eq!(deployment.units().len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_foreign_handle_panics() {
        let ctx = DeployContext::new("cms", "123456789012");
        let mut first = Deployment::new(ctx.clone());
        first.declare("Governance", syd(), Vec::new());
        let edge = first.declare("Edge", syd(), Vec::new());

        let second = Deployment::new(ctx);
        let _ = second.unit(edge);
    }

    #[test]
    fn test_imports_are_deduplicated_in_order() {
        let vpc = AttributeRef::new("Network", "vpc_id");
        let cidr = AttributeRef::new("Network", "vpc_cidr");
        let unit = Unit::new(
            "Database",
            syd(),
            vec![
                ResourceIntent::new("Db", ResourceKind::DatabaseInstance)
                    .with("vpc_id", vpc.import())
                    .with("subnets", vpc.import()),
            ],
        )
        .with_boundary(SecurityBoundary::new("DbSg", "db").allow_from(
            Peer::Cidr(cidr.import()),
            Port::tcp(3306),
            "MySQL from inside VPC",
        ));

        assert_eq!(unit.imports(), vec![cidr, vpc]);
    }

    #[test]
    fn test_locality_mismatch_from_region_pin() {
        let unit = Unit::new(
            "Network",
            syd(),
            vec![ResourceIntent::new("CmsVpc", ResourceKind::Vpc).pinned_to("us-east-1")],
        );
        let err = unit.validate().unwrap_err();
        assert!(matches!(err, Error::LocalityMismatch { .. }));
    }

    #[test]
    fn test_locality_mismatch_from_edge_resource() {
        let unit = Unit::new(
            "Compute",
            syd(),
            vec![ResourceIntent::new("Cdn", ResourceKind::Distribution)],
        );
        assert!(matches!(
            unit.validate(),
            Err(Error::LocalityMismatch { .. })
        ));
    }

    #[test]
    fn test_locality_mismatch_from_arn() {
        let cert = |arn: &str| {
            Unit::new(
                "Compute",
                syd(),
                vec![ResourceIntent::new("OriginCert", ResourceKind::Certificate)
                    .with("certificate_arn", arn)],
            )
        };

        assert!(cert("arn:aws:acm:ap-southeast-2:").validate().is_ok());
        assert!(cert("arn:aws:acm:ap-southeast-2:123456789012:certificate/abc")
            .validate()
            .is_ok());

        let err = cert("arn:aws:acm:us-east-1:").validate().unwrap_err();
        assert_eq!(
            err,
            Error::LocalityMismatch {
                unit: "Compute".into(),
                resource: "OriginCert".into(),
                expected: "123456789012/us-east-1".into(),
                actual: "123456789012/ap-southeast-2".into(),
            }
        );

        let other_account = cert("arn:aws:acm:ap-southeast-2:999999999999:certificate/abc");
        assert!(other_account.validate().is_err());
    }

    #[test]
    fn test_local_references_must_point_backwards() {
        let unit = Unit::new(
            "Governance",
            syd(),
            vec![
                ResourceIntent::new("AccountTrail", ResourceKind::Trail)
                    .with("bucket", Value::local("TrailBucket", "name")),
                ResourceIntent::new("TrailBucket", ResourceKind::Bucket),
            ],
        );
        assert!(matches!(
            unit.validate(),
            Err(Error::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_duplicate_resources_are_rejected() {
        let unit = Unit::new(
            "Network",
            syd(),
            vec![
                ResourceIntent::new("CmsVpc", ResourceKind::Vpc),
                ResourceIntent::new("CmsVpc", ResourceKind::Vpc),
            ],
        );
        assert!(matches!(
            unit.validate(),
            Err(Error::DuplicateResource { .. })
        ));
    }
}
