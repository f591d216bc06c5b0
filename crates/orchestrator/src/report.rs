//! Deployment result reporting

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;
use crate::types::{ExecuteSummary, Locality};
use crate::unit::Unit;

/// Where a run ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Completed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a unit never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum SkipCause {
    /// The run failed validation before anything was deployed
    PlanningFailed,
    /// A unit this one depends on (directly or transitively) failed
    DependencyFailed { unit: String },
    /// Another unit failed and no new wave was started
    RunHalted { unit: String },
    /// The run was cancelled before this unit started
    Cancelled,
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlanningFailed => write!(f, "planning failed"),
            Self::DependencyFailed { unit } => write!(f, "dependency {unit} failed"),
            Self::RunHalted { unit } => write!(f, "run halted after {unit} failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal state of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    Failed { reason: Error },
    Skipped { cause: SkipCause },
}

impl UnitStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Skipped { cause } => write!(f, "skipped: {cause}"),
        }
    }
}

/// Per-unit report line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub name: String,
    pub locality: Locality,
    /// Wave the unit was scheduled in; `None` when planning failed
    pub wave: Option<usize>,
    pub status: UnitStatus,
    pub summary: ExecuteSummary,
}

/// Outcome of a whole run, serializable for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub phase: Phase,
    /// One entry per declared unit, in declaration order
    pub units: Vec<UnitReport>,
    /// Committed exports per unit
    pub exports: BTreeMap<String, BTreeMap<String, String>>,
    /// First root-cause error, if the run failed
    pub error: Option<Error>,
    pub summary: ExecuteSummary,
}

impl DeploymentResult {
    /// Result of a run that never got past planning
    pub fn planning_failed(units: &[Unit], error: Error) -> Self {
        let units = units
            .iter()
            .map(|unit| UnitReport {
                name: unit.name.clone(),
                locality: unit.locality.clone(),
                wave: None,
                status: UnitStatus::Skipped {
                    cause: SkipCause::PlanningFailed,
                },
                summary: ExecuteSummary::default(),
            })
            .collect();

        Self {
            phase: Phase::Failed,
            units,
            exports: BTreeMap::new(),
            error: Some(error),
            summary: ExecuteSummary::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Report for a unit by name
    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|report| report.name == name)
    }

    /// Status of a unit by name
    pub fn status(&self, name: &str) -> Option<&UnitStatus> {
        self.unit(name).map(|report| &report.status)
    }

    /// Count units by terminal state: (completed, failed, skipped)
    pub fn counts(&self) -> (usize, usize, usize) {
        self.units.iter().fold((0, 0, 0), |(c, f, s), report| match report.status {
            UnitStatus::Completed => (c + 1, f, s),
            UnitStatus::Failed { .. } => (c, f + 1, s),
            UnitStatus::Skipped { .. } => (c, f, s + 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_failure_skips_every_unit() {
        let locality = Locality::new("123456789012", "ap-southeast-2");
        let units = vec![
            Unit::new("Network", locality.clone(), Vec::new()),
            Unit::new("Network", locality, Vec::new()),
        ];
        let result = DeploymentResult::planning_failed(
            &units,
            Error::DuplicateUnit {
                name: "Network".into(),
            },
        );

        assert!(!result.is_success());
        assert_eq!(result.counts(), (0, 0, 2));
        assert_eq!(
            result.status("Network"),
            Some(&UnitStatus::Skipped {
                cause: SkipCause::PlanningFailed
            })
        );
    }

    #[test]
    fn test_result_serializes_for_audit() {
        let result = DeploymentResult {
            phase: Phase::Failed,
            units: vec![UnitReport {
                name: "Edge".into(),
                locality: Locality::new("123456789012", "us-east-1"),
                wave: Some(4),
                status: UnitStatus::Skipped {
                    cause: SkipCause::DependencyFailed {
                        unit: "Compute".into(),
                    },
                },
                summary: ExecuteSummary::default(),
            }],
            exports: BTreeMap::new(),
            error: None,
            summary: ExecuteSummary::default(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["phase"], "failed");
        assert_eq!(json["units"][0]["status"]["status"], "skipped");
        assert_eq!(json["units"][0]["status"]["cause"]["cause"], "dependency_failed");
        assert_eq!(json["units"][0]["status"]["cause"]["unit"], "Compute");
    }
}
