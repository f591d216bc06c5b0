//! Security boundaries
//!
//! A boundary is a default-deny network perimeter: traffic is only allowed
//! where a rule names a concrete peer and a concrete port. Boundaries are
//! provisioned as security groups before the rest of their unit.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::types::{ResourceIntent, ResourceKind, Value};

static CIDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})$").expect("valid CIDR pattern")
});

static PREFIX_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pl-[0-9a-f]{8,17}$").expect("valid prefix list pattern"));

/// A single TCP port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
}

impl Port {
    pub fn tcp(number: u16) -> Self {
        Self { number }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp/{}", self.number)
    }
}

/// Other side of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    /// Another boundary in the same unit
    Boundary(String),
    /// An address range, possibly imported from another unit
    Cidr(Value),
    /// A managed prefix list (e.g. the CDN's origin-facing ranges)
    PrefixList(String),
    /// Any IPv4 address; only valid for egress
    AnyIpv4,
}

/// Allow rule: traffic to/from `peer` on `port`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub peer: Peer,
    pub port: Port,
    pub description: String,
}

/// Named set of ingress/egress rules around part of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityBoundary {
    pub name: String,
    pub description: String,
    pub ingress: Vec<Rule>,
    pub egress: Vec<Rule>,
}

impl SecurityBoundary {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    /// Allow inbound traffic from `peer` on `port`
    pub fn allow_from(mut self, peer: Peer, port: Port, description: impl Into<String>) -> Self {
        self.ingress.push(Rule {
            peer,
            port,
            description: description.into(),
        });
        self
    }

    /// Allow outbound traffic to `peer` on `port`
    pub fn allow_to(mut self, peer: Peer, port: Port, description: impl Into<String>) -> Self {
        self.egress.push(Rule {
            peer,
            port,
            description: description.into(),
        });
        self
    }

    /// Check the boundary's rules
    ///
    /// `earlier` holds the names of boundaries declared before this one in
    /// the same unit; boundary peers must be one of those or this boundary.
    pub fn validate(&self, unit: &str, earlier: &[&str]) -> Result<()> {
        let invalid = |message: String| Error::InvalidSecurityRule {
            unit: unit.to_string(),
            boundary: self.name.clone(),
            message,
        };

        for rule in &self.ingress {
            if matches!(rule.peer, Peer::AnyIpv4) {
                return Err(invalid(format!(
                    "ingress rule '{}' must name a concrete source",
                    rule.description
                )));
            }
        }

        for rule in self.ingress.iter().chain(&self.egress) {
            if rule.port.number == 0 {
                return Err(invalid(format!(
                    "rule '{}' must name a concrete port",
                    rule.description
                )));
            }

            match &rule.peer {
                Peer::Boundary(name) if name != &self.name && !earlier.contains(&name.as_str()) => {
                    return Err(invalid(format!(
                        "rule '{}' references unknown boundary {name}",
                        rule.description
                    )));
                }
                Peer::Cidr(Value::Literal(cidr)) if !is_valid_cidr(cidr) => {
                    return Err(invalid(format!(
                        "rule '{}' has invalid address range {cidr}",
                        rule.description
                    )));
                }
                Peer::PrefixList(id) if !PREFIX_LIST_RE.is_match(id) => {
                    return Err(invalid(format!(
                        "rule '{}' has invalid prefix list {id}",
                        rule.description
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Security group intent that realizes this boundary
    pub fn to_intent(&self) -> ResourceIntent {
        let mut intent = ResourceIntent::new(&self.name, ResourceKind::SecurityGroup)
            .with("description", self.description.as_str())
            .with("allow_all_outbound", false);

        for (direction, rules) in [("ingress", &self.ingress), ("egress", &self.egress)] {
            for (i, rule) in rules.iter().enumerate() {
                let prefix = format!("{direction}.{i:02}");
                intent = intent
                    .with(format!("{prefix}.peer"), self.peer_value(&rule.peer))
                    .with(format!("{prefix}.port"), rule.port.to_string())
                    .with(format!("{prefix}.description"), rule.description.as_str());
            }
        }

        intent
    }

    fn peer_value(&self, peer: &Peer) -> Value {
        match peer {
            Peer::Boundary(name) if name == &self.name => Value::from("self"),
            Peer::Boundary(name) => Value::local(name, "id"),
            Peer::Cidr(value) => value.clone(),
            Peer::PrefixList(id) => Value::from(id),
            Peer::AnyIpv4 => Value::from("0.0.0.0/0"),
        }
    }

    /// Values the boundary depends on, in rule order
    pub fn values(&self) -> Vec<Value> {
        self.ingress
            .iter()
            .chain(&self.egress)
            .map(|rule| self.peer_value(&rule.peer))
            .collect()
    }
}

fn is_valid_cidr(cidr: &str) -> bool {
    let Some(caps) = CIDR_RE.captures(cidr) else {
        return false;
    };
    let octets_ok = (1..=4).all(|i| caps[i].parse::<u16>().is_ok_and(|octet| octet <= 255));
    let prefix_ok = caps[5].parse::<u8>().is_ok_and(|prefix| prefix <= 32);
    octets_ok && prefix_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::AttributeRef;

    fn alb() -> SecurityBoundary {
        SecurityBoundary::new("AlbSg", "ALB inbound HTTPS from CloudFront only")
            .allow_from(
                Peer::PrefixList("pl-b8a742d1".into()),
                Port::tcp(443),
                "CloudFront HTTPS",
            )
            .allow_to(Peer::AnyIpv4, Port::tcp(80), "To tasks HTTP")
    }

    #[test]
    fn test_valid_boundaries() {
        assert!(alb().validate("Compute", &[]).is_ok());

        let task = SecurityBoundary::new("TaskSg", "tasks")
            .allow_from(Peer::Boundary("AlbSg".into()), Port::tcp(80), "ALB to tasks")
            .allow_to(
                Peer::Cidr(AttributeRef::new("Network", "vpc_cidr").import()),
                Port::tcp(3306),
                "MySQL inside VPC",
            );
        assert!(task.validate("Compute", &["AlbSg"]).is_ok());
    }

    #[test]
    fn test_ingress_from_anywhere_is_rejected() {
        let open = SecurityBoundary::new("Open", "open").allow_from(
            Peer::AnyIpv4,
            Port::tcp(443),
            "world",
        );
        let err = open.validate("Compute", &[]).unwrap_err();
        assert_eq!(err.kind(), "InvalidSecurityRuleError");
    }

    #[test]
    fn test_rules_need_ports_and_known_peers() {
        let no_port = SecurityBoundary::new("Db", "db").allow_from(
            Peer::Cidr("10.0.0.0/16".into()),
            Port::tcp(0),
            "any port",
        );
        assert!(no_port.validate("Database", &[]).is_err());

        let unknown = SecurityBoundary::new("TaskSg", "tasks").allow_from(
            Peer::Boundary("AlbSg".into()),
            Port::tcp(80),
            "ALB to tasks",
        );
        assert!(unknown.validate("Compute", &[]).is_err());

        let bad_cidr = SecurityBoundary::new("Db", "db").allow_from(
            Peer::Cidr("10.0.0.300/16".into()),
            Port::tcp(3306),
            "typo",
        );
        assert!(bad_cidr.validate("Database", &[]).is_err());
    }

    #[test]
    fn test_to_intent_renders_rules() {
        let intent = alb().to_intent();
        assert_eq!(intent.kind, ResourceKind::SecurityGroup);
        assert_eq!(
            intent.properties.get("ingress.00.peer"),
            Some(&Value::from("pl-b8a742d1"))
        );
        assert_eq!(
            intent.properties.get("ingress.00.port"),
            Some(&Value::from("tcp/443"))
        );
        assert_eq!(
            intent.properties.get("egress.00.peer"),
            Some(&Value::from("0.0.0.0/0"))
        );
    }

    #[test]
    fn test_cidr_validation() {
        assert!(is_valid_cidr("10.0.0.0/16"));
        assert!(is_valid_cidr("0.0.0.0/0"));
        assert!(!is_valid_cidr("10.0.0.0"));
        assert!(!is_valid_cidr("10.0.0.0/33"));
        assert!(!is_valid_cidr("256.0.0.0/8"));
    }
}
