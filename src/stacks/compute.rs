//! WordPress on Fargate behind an internet-facing load balancer that only
//! the CDN may reach.

use orchestrator::{
    AttributeRef, Deployment, Peer, Port, ResourceIntent, ResourceKind, SecurityBoundary, Unit,
    UnitHandle, Value,
};

use super::COMPUTE;
use super::database::{DB_NAME, Database};
use super::network::Network;
use crate::schema::DeployConfig;

/// Export consumed by the edge unit
pub const ORIGIN_HOSTNAME: &str = "origin_hostname";

/// CDN origin-facing address ranges
const CLOUDFRONT_PREFIX_LIST: &str = "pl-b8a742d1";

#[derive(Debug, Clone)]
pub struct Compute {
    pub handle: UnitHandle,
    pub origin_hostname: AttributeRef,
}

pub fn declare(
    deployment: &mut Deployment,
    config: &DeployConfig,
    network: &Network,
    database: &Database,
) -> Compute {
    let compute = &config.compute;
    let locality = deployment.context().locality(&config.regions.primary);
    let vpc_cidr = || Peer::Cidr(network.vpc_cidr.import());

    let alb_sg = SecurityBoundary::new("AlbSg", "ALB inbound HTTPS from CloudFront only")
        .allow_from(
            Peer::PrefixList(CLOUDFRONT_PREFIX_LIST.to_string()),
            Port::tcp(443),
            "CloudFront HTTPS",
        )
        .allow_to(Peer::AnyIpv4, Port::tcp(80), "To tasks HTTP");

    let task_sg = SecurityBoundary::new("TaskSg", "Fargate tasks inbound from ALB over HTTP")
        .allow_from(Peer::Boundary("AlbSg".to_string()), Port::tcp(80), "ALB to tasks")
        .allow_to(vpc_cidr(), Port::tcp(3306), "MySQL inside VPC")
        .allow_to(Peer::AnyIpv4, Port::tcp(443), "HTTPS")
        .allow_to(vpc_cidr(), Port::tcp(2049), "EFS NFS");

    let fs_sg = SecurityBoundary::new("FsSg", "EFS inbound NFS from Fargate tasks")
        .allow_from(Peer::Boundary("TaskSg".to_string()), Port::tcp(2049), "Tasks to EFS");

    let intents = vec![
        // Lookups
        ResourceIntent::new("Zone", ResourceKind::HostedZone)
            .with("lookup", true)
            .with("domain_name", &config.domain_name),
        ResourceIntent::new("OriginCert", ResourceKind::Certificate)
            .with("import", true)
            .with("certificate_arn", &config.certificates.origin_arn),
        // Cluster and logs
        ResourceIntent::new("CmsCluster", ResourceKind::Cluster)
            .with("vpc_id", network.vpc_id.import()),
        ResourceIntent::new("WordPressLogs", ResourceKind::LogGroup).with("retention_days", 7u32),
        ResourceIntent::new("AlbLogBucket", ResourceKind::Bucket)
            .with("encryption", "S3_MANAGED")
            .with("block_public_access", "BLOCK_ALL")
            .with("expiration_days", 90u32)
            .with("removal_policy", "RETAIN"),
        // Load balancer
        ResourceIntent::new("WpAlb", ResourceKind::LoadBalancer)
            .with("internet_facing", true)
            .with("vpc_id", network.vpc_id.import())
            .with("subnets", network.public_subnets.import())
            .with("security_group", Value::local("AlbSg", "id"))
            .with("access_logs.bucket", Value::local("AlbLogBucket", "name"))
            .with("access_logs.prefix", "alb"),
        ResourceIntent::new("WpTg", ResourceKind::TargetGroup)
            .with("vpc_id", network.vpc_id.import())
            .with("protocol", "HTTP")
            .with("port", 80u16)
            .with("target_type", "IP")
            .with("health_check.path", "/")
            .with("health_check.healthy_http_codes", "200-399")
            .with("health_check.interval_secs", 30u32)
            .with("stickiness_secs", 3600u32),
        ResourceIntent::new("Https", ResourceKind::Listener)
            .with("load_balancer", Value::local("WpAlb", "arn"))
            .with("port", 443u16)
            .with("ssl_policy", "RECOMMENDED_TLS")
            .with("certificate", Value::local("OriginCert", "arn"))
            .with("default_target_group", Value::local("WpTg", "arn")),
        ResourceIntent::new("OriginAlias", ResourceKind::DnsRecord)
            .with("record_type", "A")
            .with("record_name", "origin")
            .with("zone_id", Value::local("Zone", "zone_id"))
            .with("zone_name", Value::local("Zone", "zone_name"))
            .with("alias_target", Value::local("WpAlb", "dns_name")),
        // Shared wp-content
        ResourceIntent::new("WpFs", ResourceKind::FileSystem)
            .with("vpc_id", network.vpc_id.import())
            .with("subnets", network.private_subnets.import())
            .with("security_group", Value::local("FsSg", "id"))
            .with("encrypted", true)
            .with("performance_mode", "GENERAL_PURPOSE")
            .with("lifecycle_policy", "AFTER_14_DAYS")
            .with("removal_policy", "RETAIN"),
        ResourceIntent::new("WpAp", ResourceKind::AccessPoint)
            .with("file_system", Value::local("WpFs", "file_system_id"))
            .with("path", "/wordpress/wp-content")
            .with("owner_uid", 33u32)
            .with("owner_gid", 33u32)
            .with("permissions", "755"),
        // Service
        ResourceIntent::new("TaskDef", ResourceKind::TaskDefinition)
            .with("cpu", compute.cpu)
            .with("memory_mib", compute.memory_mib)
            .with("container.image", &compute.image)
            .with("container.port", 80u16)
            .with("container.log_group", Value::local("WordPressLogs", "name"))
            .with("container.log_prefix", "wp")
            .with("env.WORDPRESS_DB_HOST", database.endpoint.import())
            .with("env.WORDPRESS_DB_NAME", DB_NAME)
            .with("secret.WORDPRESS_DB_USER", database.secret_arn.import())
            .with("secret.WORDPRESS_DB_PASSWORD", database.secret_arn.import())
            .with("volume.wp-content.file_system", Value::local("WpFs", "file_system_id"))
            .with("volume.wp-content.access_point", Value::local("WpAp", "access_point_id"))
            .with("volume.wp-content.mount_path", "/var/www/html/wp-content"),
        ResourceIntent::new("WpService", ResourceKind::Service)
            .with("cluster", Value::local("CmsCluster", "arn"))
            .with("task_definition", Value::local("TaskDef", "arn"))
            .with("desired_count", compute.desired_count)
            .with("subnets", network.private_subnets.import())
            .with("security_group", Value::local("TaskSg", "id"))
            .with("assign_public_ip", false)
            .with("min_healthy_percent", 100u32)
            .with("max_percent", 200u32)
            .with("target_group", Value::local("WpTg", "arn")),
        ResourceIntent::new("Cpu55", ResourceKind::ScalingPolicy)
            .with("service", Value::local("WpService", "arn"))
            .with("min_capacity", compute.min_capacity)
            .with("max_capacity", compute.max_capacity)
            .with("target_cpu_percent", compute.target_cpu_percent)
            .with("scale_in_cooldown_secs", 300u32)
            .with("scale_out_cooldown_secs", 120u32),
    ];

    let unit = Unit::new(COMPUTE, locality, intents)
        .with_boundary(alb_sg)
        .with_boundary(task_sg)
        .with_boundary(fs_sg);
    let handle = deployment.add(unit);

    Compute {
        handle,
        origin_hostname: deployment.export(
            handle,
            ORIGIN_HOSTNAME,
            Value::local("OriginAlias", "fqdn"),
        ),
    }
}
