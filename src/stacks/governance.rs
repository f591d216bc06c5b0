//! Account governance baseline

use orchestrator::{Deployment, ResourceIntent, ResourceKind, Unit, UnitHandle, Value};

use super::GOVERNANCE;
use crate::schema::DeployConfig;

pub fn declare(deployment: &mut Deployment, config: &DeployConfig) -> UnitHandle {
    let locality = deployment.context().locality(&config.regions.primary);
    let standard_arn = format!(
        "arn:aws:securityhub:{}::standards/aws-foundational-security-best-practices/v/1.0.0",
        config.regions.primary
    );

    let intents = vec![
        ResourceIntent::new("TrailBucket", ResourceKind::Bucket)
            .with("encryption", "S3_MANAGED")
            .with("block_public_access", "BLOCK_ALL")
            .with("expiration_days", 365u32),
        ResourceIntent::new("AccountTrail", ResourceKind::Trail)
            .with("bucket", Value::local("TrailBucket", "name"))
            .with("multi_region", true)
            .with("include_global_service_events", true)
            .with("management_events", "ALL")
            .with("file_validation", true),
        ResourceIntent::new("GuardDutyDetector", ResourceKind::ThreatDetector)
            .with("enable", true),
        ResourceIntent::new("SecurityHub", ResourceKind::SecurityHub),
        ResourceIntent::new("EnableAFSBP", ResourceKind::SecurityStandard)
            .with("hub", Value::local("SecurityHub", "arn"))
            .with("standards_arn", standard_arn),
        ResourceIntent::new("MonthlyBudget", ResourceKind::Budget)
            .with("budget_type", "COST")
            .with("time_unit", "MONTHLY")
            .with("limit_amount", config.budget.monthly_limit_usd)
            .with("limit_unit", "USD")
            .with("comparison_operator", "GREATER_THAN")
            .with("threshold", config.budget.alert_threshold_percent)
            .with("notification_type", "ACTUAL")
            .with("subscriber_email", &config.budget_email),
    ];

    deployment.add(Unit::new(GOVERNANCE, locality, intents).with_tag("Compliance", "Baseline"))
}
