//! Error types for the orchestrator.
//!
//! Errors are split by the phase that raises them. Planning errors are
//! detected before any provider is called and abort the whole run.
//! Execution errors are scoped to the failing unit and its consumers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::unit::AttributeRef;

/// Why a reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The producing unit is not part of this run
    UnknownProducer,
    /// The producer failed or was skipped
    ProducerFailed,
    /// The producer has not committed its exports yet
    ProducerNotCompleted,
    /// The producer completed without exporting the key
    MissingExport,
    /// Waiting for the producer exceeded the configured timeout
    TimedOut { waited_ms: u64 },
    /// The run was cancelled while waiting
    Cancelled,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProducer => write!(f, "producer is not part of this run"),
            Self::ProducerFailed => write!(f, "producer failed"),
            Self::ProducerNotCompleted => write!(f, "producer has not completed"),
            Self::MissingExport => write!(f, "producer does not export this key"),
            Self::TimedOut { waited_ms } => write!(f, "timed out after {waited_ms}ms"),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Errors raised while planning or executing a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Error {
    /// Two units share a name
    #[error("duplicate unit: {name}")]
    DuplicateUnit { name: String },

    /// A resource intent cannot live in its unit's locality
    #[error("unit {unit}: resource {resource} belongs to {expected}, but the unit deploys to {actual}")]
    LocalityMismatch {
        unit: String,
        resource: String,
        expected: String,
        actual: String,
    },

    /// The dependency edges form a cycle
    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    /// An edge or import names a unit that was never declared
    #[error("unknown unit {name} (referenced by {referenced_by})")]
    UnknownUnit { name: String, referenced_by: String },

    /// An import names a key its producer does not export
    #[error("unit {producer} does not export {key} (imported by {consumer})")]
    UnknownExport {
        producer: String,
        key: String,
        consumer: String,
    },

    /// A same-unit reference points at a resource not declared before it
    #[error("unit {unit}: {resource} references {target}, which is not declared before it")]
    UnknownResource {
        unit: String,
        resource: String,
        target: String,
    },

    /// Two intents in one unit share a logical id
    #[error("unit {unit}: resource {resource} is declared twice")]
    DuplicateResource { unit: String, resource: String },

    /// A security boundary rule breaks the boundary invariants
    #[error("unit {unit}: boundary {boundary}: {message}")]
    InvalidSecurityRule {
        unit: String,
        boundary: String,
        message: String,
    },

    /// A provider rejected or failed a resource intent
    #[error("unit {unit}: applying {resource} failed: {message}")]
    ProviderApply {
        unit: String,
        resource: String,
        message: String,
    },

    /// A consumer could not obtain a producer's export
    #[error("unresolved reference {reference}: {reason}")]
    UnresolvedReference {
        reference: AttributeRef,
        reason: UnresolvedReason,
    },

    /// The run was cancelled
    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Stable name of the error kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateUnit { .. } => "DuplicateUnitError",
            Self::LocalityMismatch { .. } => "LocalityMismatchError",
            Self::CyclicDependency { .. } => "CyclicDependencyError",
            Self::UnknownUnit { .. } => "UnknownUnitError",
            Self::UnknownExport { .. } => "UnknownExportError",
            Self::UnknownResource { .. } => "UnknownResourceError",
            Self::DuplicateResource { .. } => "DuplicateResourceError",
            Self::InvalidSecurityRule { .. } => "InvalidSecurityRuleError",
            Self::ProviderApply { .. } => "ProviderApplyError",
            Self::UnresolvedReference { .. } => "UnresolvedReferenceError",
            Self::Cancelled => "CancelledError",
        }
    }

    pub(crate) fn unresolved(reference: &AttributeRef, reason: UnresolvedReason) -> Self {
        Self::UnresolvedReference {
            reference: reference.clone(),
            reason,
        }
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_errors_render() {
        let err = Error::DuplicateUnit {
            name: "Network".into(),
        };
        assert_eq!(err.kind(), "DuplicateUnitError");

        let err = Error::CyclicDependency {
            path: vec!["Y".into(), "X".into(), "Y".into()],
        };
        assert_eq!(err.kind(), "CyclicDependencyError");
        assert_eq!(err.to_string(), "cyclic dependency: Y -> X -> Y");
    }

    #[test]
    fn test_execution_errors_render() {
        let err = Error::unresolved(
            &AttributeRef::new("Compute", "origin_hostname"),
            UnresolvedReason::TimedOut { waited_ms: 250 },
        );
        assert_eq!(err.kind(), "UnresolvedReferenceError");
        assert_eq!(
            err.to_string(),
            "unresolved reference Compute.origin_hostname: timed out after 250ms"
        );
        assert_eq!(Error::Cancelled.kind(), "CancelledError");
    }
}
