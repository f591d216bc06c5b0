//! # Orchestrator
//!
//! Multi-unit provisioning: a deployment is a graph of independently
//! deployable units (stacks), each targeting one account/region locality.
//! The orchestrator validates the graph, orders units into waves, resolves
//! exports between units (replicating them across localities), and drives
//! every resource intent through a [`ResourceProvider`].
//!
//! ## Core Concepts
//!
//! - **Unit**: named bundle of resource intents and security boundaries with
//!   a locality and exported attributes
//! - **Deployment**: pure declaration builder; nothing is provisioned while
//!   declaring
//! - **Plan**: validated graph and wave order; planning errors stop the run
//!   before any provider call
//! - **ReferenceResolver**: committed export table, direct reads in the same
//!   locality, replicated parameters across localities
//! - **Orchestrator**: runs waves in order, units of a wave in parallel
//!
//! ## Example
//!
//! ```ignore
//! use orchestrator::{DeployContext, Deployment, MemoryProvider, Orchestrator};
//! use orchestrator::{ResourceIntent, ResourceKind, Value};
//!
//! let ctx = DeployContext::new("cms", "123456789012");
//! let mut deployment = Deployment::new(ctx.clone());
//!
//! let compute = deployment.declare(
//!     "Compute",
//!     ctx.locality("ap-southeast-2"),
//!     vec![ResourceIntent::new("Alb", ResourceKind::LoadBalancer)],
//! );
//! let hostname = deployment.export(compute, "origin_hostname", Value::local("Alb", "dns_name"));
//!
//! deployment.declare(
//!     "Edge",
//!     ctx.locality("us-east-1"),
//!     vec![ResourceIntent::new("Cdn", ResourceKind::Distribution).with("origin", &hostname)],
//! );
//!
//! let provider = MemoryProvider::new();
//! let result = Orchestrator::new(&provider, ctx).run(deployment.units(), deployment.edges());
//! assert!(result.is_success());
//! ```
//!
//! ## Provider Contract
//!
//! [`ResourceProvider::apply`] is idempotent per locality, unit and logical
//! id, keyed on the intent fingerprint. [`ResourceProvider::rollback`]
//! removes only the resources created by an aborted pass.

pub mod boundary;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod memory;
pub mod plan;
pub mod provider;
pub mod report;
pub mod resolver;
pub mod types;
pub mod unit;

// Re-export main types at crate root
pub use boundary::{Peer, Port, Rule, SecurityBoundary};
pub use context::{CancellationToken, DeployContext, NoProgress, ProgressCallback};
pub use error::{Error, Result, UnresolvedReason};
pub use executor::Orchestrator;
pub use graph::{DependencyGraph, Edge, EdgeReason, Wave, to_dot};
pub use memory::{MemoryProvider, StoredHandle};
pub use plan::{CrossReference, Plan};
pub use provider::{Applied, Handle, ProviderError, ResourceProvider};
pub use report::{DeploymentResult, Phase, SkipCause, UnitReport, UnitStatus};
pub use resolver::{DeferredRef, Imported, ProducerStatus, ReferenceResolver};
pub use types::{
    ApplyOutcome, EDGE_REGION, ExecuteOptions, ExecuteSummary, FailurePolicy, Locality,
    ResolvePolicy, ResolvedIntent, ResourceIntent, ResourceKind, Value,
};
pub use unit::{AttributeRef, Deployment, Unit, UnitHandle};
