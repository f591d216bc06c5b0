//! Deployment planner - validates units and orders them into waves

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::context::DeployContext;
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, Edge, Wave};
use crate::types::Locality;
use crate::unit::{AttributeRef, Unit};

/// An import whose producer and consumer live in different localities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub reference: AttributeRef,
    pub consumer: String,
    pub producer_locality: Locality,
    pub consumer_locality: Locality,
    /// Parameter the export is replicated into
    pub parameter: String,
}

/// A validated deployment: units, their graph and the wave order
#[derive(Debug, Clone)]
pub struct Plan {
    units: Vec<Unit>,
    index: HashMap<String, usize>,
    graph: DependencyGraph,
    waves: Vec<Wave>,
    cross_references: Vec<CrossReference>,
}

impl Plan {
    /// Validate units and edges and compute the waves
    ///
    /// Checks run in a fixed order so the first reported error is stable:
    /// duplicate names, per-unit validation (locality, resources,
    /// boundaries), imports, explicit edges, cycles.
    pub fn build(units: &[Unit], edges: &[Edge], context: &DeployContext) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, unit) in units.iter().enumerate() {
            if index.insert(unit.name.clone(), i).is_some() {
                return Err(Error::DuplicateUnit {
                    name: unit.name.clone(),
                });
            }
        }

        for unit in units {
            unit.validate()?;
        }

        let mut cross_references = Vec::new();
        for unit in units {
            for reference in unit.imports() {
                let Some(&producer) = index.get(&reference.unit) else {
                    return Err(Error::UnknownUnit {
                        name: reference.unit.clone(),
                        referenced_by: unit.name.clone(),
                    });
                };
                let producer = &units[producer];
                if !producer.exports.contains_key(&reference.key) {
                    return Err(Error::UnknownExport {
                        producer: producer.name.clone(),
                        key: reference.key.clone(),
                        consumer: unit.name.clone(),
                    });
                }
                if producer.locality != unit.locality {
                    cross_references.push(CrossReference {
                        parameter: context.parameter_name(&reference.unit, &reference.key),
                        reference,
                        consumer: unit.name.clone(),
                        producer_locality: producer.locality.clone(),
                        consumer_locality: unit.locality.clone(),
                    });
                }
            }
        }

        let graph = DependencyGraph::from_units(units, edges)?;
        let waves = graph.topological_order()?;

        log::debug!(
            "planned {} units in {} waves ({} cross-locality references)",
            units.len(),
            waves.len(),
            cross_references.len()
        );

        Ok(Self {
            units: units.to_vec(),
            index,
            graph,
            waves,
            cross_references,
        })
    }

    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Units in declaration order
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    pub fn cross_references(&self) -> &[CrossReference] {
        &self.cross_references
    }

    /// Wave a unit is scheduled in
    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.waves
            .iter()
            .find(|wave| wave.units.iter().any(|unit| unit == name))
            .map(|wave| wave.index)
    }

    /// Localities other than the producer's own that import its exports
    pub fn consumer_localities(&self, producer: &str) -> Vec<Locality> {
        let localities: BTreeSet<Locality> = self
            .cross_references
            .iter()
            .filter(|cross| cross.reference.unit == producer)
            .map(|cross| cross.consumer_locality.clone())
            .collect();
        localities.into_iter().collect()
    }

    /// Every unit that depends on `name`, directly or transitively
    pub fn transitive_consumers(&self, name: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            for consumer in self.graph.consumers_of(current) {
                if seen.insert(consumer) {
                    stack.push(consumer);
                }
            }
        }
        let mut consumers: Vec<&str> = seen.into_iter().collect();
        consumers.sort_by_key(|unit| self.index.get(*unit).copied().unwrap_or(usize::MAX));
        consumers
    }

    /// Human-readable outline of the plan
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for wave in &self.waves {
            out.push_str(&format!("wave {}:\n", wave.index));
            for name in &wave.units {
                let locality = self
                    .unit(name)
                    .map(|unit| unit.locality.to_string())
                    .unwrap_or_default();
                out.push_str(&format!("  {name} ({locality})\n"));
                for producer in self.graph.producers_of(name) {
                    out.push_str(&format!("    after {producer}\n"));
                }
            }
        }
        for cross in &self.cross_references {
            out.push_str(&format!(
                "{} -> {} via {} ({} -> {})\n",
                cross.reference,
                cross.consumer,
                cross.parameter,
                cross.producer_locality,
                cross.consumer_locality
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceIntent, ResourceKind, Value};

    fn ctx() -> DeployContext {
        DeployContext::new("cms", "123456789012")
    }

    fn syd() -> Locality {
        Locality::new("123456789012", "ap-southeast-2")
    }

    fn use1() -> Locality {
        Locality::new("123456789012", "us-east-1")
    }

    fn compute() -> Unit {
        Unit::new(
            "Compute",
            syd(),
            vec![ResourceIntent::new("Alb", ResourceKind::LoadBalancer)],
        )
        .with_export("origin_hostname", Value::local("Alb", "dns_name"))
    }

    fn edge() -> Unit {
        Unit::new(
            "Edge",
            use1(),
            vec![
                ResourceIntent::new("Cdn", ResourceKind::Distribution)
                    .with("origin", AttributeRef::new("Compute", "origin_hostname")),
            ],
        )
    }

    #[test]
    fn test_cross_locality_imports_are_listed() {
        let plan = Plan::build(&[compute(), edge()], &[], &ctx()).unwrap();
        assert_eq!(plan.waves().len(), 2);
        assert_eq!(plan.wave_of("Edge"), Some(1));
        assert_eq!(plan.cross_references().len(), 1);
        assert_eq!(
            plan.cross_references()[0].parameter,
            "/cms/exports/Compute/origin_hostname"
        );
        assert_eq!(plan.consumer_localities("Compute"), vec![use1()]);
        assert!(plan.consumer_localities("Edge").is_empty());
        assert!(plan.describe().contains("Compute.origin_hostname -> Edge"));
    }

    #[test]
    fn test_unknown_export_and_unit() {
        let missing_key = Unit::new(
            "Edge",
            use1(),
            vec![
                ResourceIntent::new("Cdn", ResourceKind::Distribution)
                    .with("origin", AttributeRef::new("Compute", "hostname")),
            ],
        );
        assert_eq!(
            Plan::build(&[compute(), missing_key], &[], &ctx()).unwrap_err(),
            Error::UnknownExport {
                producer: "Compute".into(),
                key: "hostname".into(),
                consumer: "Edge".into(),
            }
        );

        assert!(matches!(
            Plan::build(&[edge()], &[], &ctx()),
            Err(Error::UnknownUnit { .. })
        ));
        assert!(matches!(
            Plan::build(&[compute()], &[Edge::explicit("Governance", "Compute")], &ctx()),
            Err(Error::UnknownUnit { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_are_reported_first() {
        let network = Unit::new("Network", syd(), Vec::new());
        let err = Plan::build(&[network.clone(), network], &[], &ctx()).unwrap_err();
        assert_eq!(
            err,
            Error::DuplicateUnit {
                name: "Network".into()
            }
        );
    }

    #[test]
    fn test_transitive_consumers() {
        let network = Unit::new("Network", syd(), Vec::new()).with_export("vpc_id", "vpc-1");
        let database = Unit::new(
            "Database",
            syd(),
            vec![
                ResourceIntent::new("Db", ResourceKind::DatabaseInstance)
                    .with("vpc_id", AttributeRef::new("Network", "vpc_id")),
            ],
        );
        let compute = compute().with_tag("Tier", "app");
        let edges = [
            Edge::explicit("Network", "Compute"),
            Edge::explicit("Compute", "Edge"),
        ];
        let plan = Plan::build(&[network, database, compute, edge()], &edges, &ctx()).unwrap();

        assert_eq!(
            plan.transitive_consumers("Network"),
            vec!["Database", "Compute", "Edge"]
        );
        assert!(plan.transitive_consumers("Edge").is_empty());
    }
}
