//! CDN edge in the edge region: WAF, distribution and apex aliases.

use orchestrator::{Deployment, ResourceIntent, ResourceKind, UnitHandle, Value};

use super::EDGE;
use super::compute::Compute;
use crate::schema::DeployConfig;

pub fn declare(deployment: &mut Deployment, config: &DeployConfig, compute: &Compute) -> UnitHandle {
    let locality = deployment.context().locality(&config.regions.edge);

    let mut cdn = ResourceIntent::new("WordpressCdn", ResourceKind::Distribution)
        .with("origin", compute.origin_hostname.import())
        .with("origin_protocol_policy", "HTTPS_ONLY")
        .with("default.viewer_protocol_policy", "REDIRECT_TO_HTTPS")
        .with("default.allowed_methods", "ALLOW_ALL")
        .with("default.cache_policy", "CACHING_OPTIMIZED")
        .with("domain_names", &config.domain_name)
        .with("certificate", Value::local("ViewerCert", "arn"))
        .with("minimum_protocol_version", "TLS_V1_2_2021")
        .with("web_acl", Value::local("WpWebAcl", "arn"))
        .with("log_bucket", Value::local("CloudFrontLogs", "name"))
        .with("log_prefix", "cloudfront");
    for path in ["wp-login.php", "wp-admin/install.php", "wp-admin/*"] {
        cdn = cdn
            .with(format!("behavior.{path}.viewer_protocol_policy"), "REDIRECT_TO_HTTPS")
            .with(format!("behavior.{path}.allowed_methods"), "ALLOW_ALL")
            .with(format!("behavior.{path}.cache_policy"), "CACHING_DISABLED");
    }

    let alias = |id: &str, record_type: &str| {
        ResourceIntent::new(id, ResourceKind::DnsRecord)
            .with("record_type", record_type)
            .with("record_name", "")
            .with("zone_id", Value::local("Zone", "zone_id"))
            .with("zone_name", Value::local("Zone", "zone_name"))
            .with("alias_target", Value::local("WordpressCdn", "domain_name"))
    };

    let intents = vec![
        ResourceIntent::new("Zone", ResourceKind::HostedZone)
            .with("lookup", true)
            .with("domain_name", &config.domain_name),
        ResourceIntent::new("CloudFrontLogs", ResourceKind::Bucket)
            .with("encryption", "S3_MANAGED")
            .with("block_public_access", "BLOCK_ALL")
            .with("object_ownership", "OBJECT_WRITER")
            .with("expiration_days", 90u32),
        ResourceIntent::new("ViewerCert", ResourceKind::Certificate)
            .with("import", true)
            .with("certificate_arn", &config.certificates.viewer_arn),
        ResourceIntent::new("WpWebAcl", ResourceKind::WebAcl)
            .with("scope", "CLOUDFRONT")
            .with("default_action", "ALLOW")
            .with("rule.00.name", "AWSManagedRulesCommonRuleSet")
            .with("rule.00.vendor", "AWS")
            .with("rule.00.override_action", "NONE")
            .with("rule.01.name", "RateLimit1k5m")
            .with("rule.01.rate_limit", 1000u32)
            .with("rule.01.aggregate_key", "IP")
            .with("rule.01.action", "BLOCK"),
        cdn,
        alias("ApexAlias", "A"),
        alias("ApexAliasAAAA", "AAAA"),
    ];

    let handle = deployment.declare(EDGE, locality, intents);
    deployment.export(
        handle,
        "distribution_domain",
        Value::local("WordpressCdn", "domain_name"),
    );
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::{COMPUTE, context};
    use orchestrator::AttributeRef;

    #[test]
    fn test_edge_imports_origin_hostname() {
        let config = DeployConfig {
            account: "123456789012".to_string(),
            ..DeployConfig::default()
        };
        let mut deployment = Deployment::new(context(&config));
        let primary = deployment.context().locality("ap-southeast-2");
        let compute = Compute {
            handle: deployment.declare(COMPUTE, primary, Vec::new()),
            origin_hostname: AttributeRef::new(COMPUTE, "origin_hostname"),
        };
        let handle = declare(&mut deployment, &config, &compute);
        let unit = deployment.unit(handle);

        assert_eq!(unit.locality.region, "us-east-1");
        assert_eq!(unit.imports(), vec![compute.origin_hostname.clone()]);
        assert!(unit.validate().is_ok());
        assert!(unit.exports.contains_key("distribution_domain"));
    }
}
