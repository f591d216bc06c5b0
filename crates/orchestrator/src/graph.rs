//! Dependency graph and wave ordering
//!
//! Edges come from explicit declarations and from imports (a consumer that
//! reads a producer's export depends on it). Ordering uses Kahn's algorithm
//! in layers: every unit whose producers all sit in earlier layers joins the
//! next wave. Units in a wave keep their declaration order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::unit::Unit;

/// Why an edge exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeReason {
    /// Declared by the composition root
    Explicit,
    /// The consumer imports the producer's export `key`
    Import { key: String },
}

impl fmt::Display for EdgeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Import { key } => write!(f, "imports {key}"),
        }
    }
}

/// Ordered pair: `producer` must complete before `consumer` starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub producer: String,
    pub consumer: String,
    pub reason: EdgeReason,
}

impl Edge {
    pub fn explicit(producer: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            consumer: consumer.into(),
            reason: EdgeReason::Explicit,
        }
    }

    pub fn import(
        producer: impl Into<String>,
        consumer: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            producer: producer.into(),
            consumer: consumer.into(),
            reason: EdgeReason::Import { key: key.into() },
        }
    }
}

/// Units that may deploy concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub index: usize,
    pub units: Vec<String>,
}

/// Graph of units and their dependency edges
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    /// producer index -> consumer indices
    consumers: Vec<BTreeSet<usize>>,
    /// consumer index -> producer indices
    producers: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from units, explicit edges and the edges their imports imply
    pub fn from_units(units: &[Unit], explicit: &[Edge]) -> Result<Self> {
        let mut graph = Self::new();
        for unit in units {
            graph.add_node(&unit.name)?;
        }
        for edge in explicit {
            graph.add_edge(&edge.producer, &edge.consumer, edge.reason.clone())?;
        }
        for unit in units {
            for reference in unit.imports() {
                graph.add_edge(
                    &reference.unit,
                    &unit.name,
                    EdgeReason::Import {
                        key: reference.key.clone(),
                    },
                )?;
            }
        }
        Ok(graph)
    }

    /// Add a unit node
    pub fn add_node(&mut self, name: &str) -> Result<usize> {
        if self.index.contains_key(name) {
            return Err(Error::DuplicateUnit {
                name: name.to_string(),
            });
        }
        let idx = self.nodes.len();
        self.nodes.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        self.consumers.push(BTreeSet::new());
        self.producers.push(BTreeSet::new());
        Ok(idx)
    }

    /// Add a dependency edge between two declared units
    pub fn add_edge(&mut self, producer: &str, consumer: &str, reason: EdgeReason) -> Result<()> {
        let p = self.lookup(producer, consumer)?;
        let c = self.lookup(consumer, producer)?;
        self.consumers[p].insert(c);
        self.producers[c].insert(p);
        self.edges.push(Edge {
            producer: producer.to_string(),
            consumer: consumer.to_string(),
            reason,
        });
        Ok(())
    }

    fn lookup(&self, name: &str, referenced_by: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownUnit {
                name: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    }

    /// Unit names in declaration order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// All edges in insertion order, explicit first
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// One edge per producer/consumer pair; explicit edges win over imports
    pub fn distinct_edges(&self) -> Vec<&Edge> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .filter(|edge| seen.insert((edge.producer.as_str(), edge.consumer.as_str())))
            .collect()
    }

    /// Direct producers of a unit, in declaration order
    pub fn producers_of(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| self.producers[i].iter().map(|&p| self.nodes[p].as_str()).collect())
            .unwrap_or_default()
    }

    /// Direct consumers of a unit, in declaration order
    pub fn consumers_of(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| self.consumers[i].iter().map(|&c| self.nodes[c].as_str()).collect())
            .unwrap_or_default()
    }

    /// Deployment waves in order
    ///
    /// Fails with [`Error::CyclicDependency`] carrying the full cycle path
    /// when the edges are not acyclic.
    pub fn topological_order(&self) -> Result<Vec<Wave>> {
        let n = self.nodes.len();
        let mut in_degree: Vec<usize> = self.producers.iter().map(BTreeSet::len).collect();
        let mut placed = vec![false; n];
        let mut waves: Vec<Wave> = Vec::new();

        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        while !ready.is_empty() {
            ready.sort_unstable();
            let mut next = Vec::new();
            for &idx in &ready {
                placed[idx] = true;
                for &consumer in &self.consumers[idx] {
                    in_degree[consumer] -= 1;
                    if in_degree[consumer] == 0 {
                        next.push(consumer);
                    }
                }
            }
            waves.push(Wave {
                index: waves.len(),
                units: ready.iter().map(|&i| self.nodes[i].clone()).collect(),
            });
            ready = next;
        }

        if placed.iter().any(|p| !p) {
            return Err(Error::CyclicDependency {
                path: self.find_cycle(&placed),
            });
        }

        Ok(waves)
    }

    /// Extract one cycle among the units Kahn's algorithm could not place
    ///
    /// Every unplaced unit has an unplaced producer, so walking producers
    /// from any unplaced unit must revisit a unit.
    fn find_cycle(&self, placed: &[bool]) -> Vec<String> {
        let Some(start) = placed.iter().position(|p| !p) else {
            return Vec::new();
        };

        let mut walk: Vec<usize> = vec![start];
        let mut current = start;
        let cycle_start = loop {
            let Some(&producer) = self.producers[current].iter().find(|&&p| !placed[p]) else {
                return Vec::new();
            };
            if let Some(pos) = walk.iter().position(|&n| n == producer) {
                break pos;
            }
            walk.push(producer);
            current = producer;
        };

        // The walk follows consumer -> producer; flip to producer -> consumer
        let mut cycle: Vec<usize> = walk[cycle_start..].iter().rev().copied().collect();

        let len = cycle.len();
        let rotate_to = (0..len)
            .find(|&i| self.is_explicit(cycle[i], cycle[(i + 1) % len]))
            .unwrap_or_else(|| {
                (0..len)
                    .min_by_key(|&i| cycle[i])
                    .unwrap_or(0)
            });
        cycle.rotate_left(rotate_to);
        cycle.push(cycle[0]);

        cycle.into_iter().map(|i| self.nodes[i].clone()).collect()
    }

    fn is_explicit(&self, producer: usize, consumer: usize) -> bool {
        self.edges.iter().any(|edge| {
            edge.reason == EdgeReason::Explicit
                && edge.producer == self.nodes[producer]
                && edge.consumer == self.nodes[consumer]
        })
    }
}

/// Render the graph in Graphviz DOT format
pub fn to_dot(graph: &DependencyGraph, waves: &[Wave]) -> String {
    let mut out = String::from("digraph deployment {\n  rankdir=LR;\n");
    for wave in waves {
        out.push_str(&format!("  subgraph cluster_wave_{} {{\n", wave.index));
        out.push_str(&format!("    label=\"wave {}\";\n", wave.index));
        for unit in &wave.units {
            out.push_str(&format!("    \"{unit}\";\n"));
        }
        out.push_str("  }\n");
    }
    for edge in graph.distinct_edges() {
        let style = match edge.reason {
            EdgeReason::Explicit => "dashed",
            EdgeReason::Import { .. } => "solid",
        };
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}\", style={style}];\n",
            edge.producer, edge.consumer, edge.reason
        ));
    }
    out.push_str("}\n");
    out
}
