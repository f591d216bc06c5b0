use orchestrator::{AttributeRef, Deployment, ResourceIntent, ResourceKind, UnitHandle, Value};

use super::NETWORK;
use crate::schema::DeployConfig;

/// Exports of the network unit
#[derive(Debug, Clone)]
pub struct Network {
    pub handle: UnitHandle,
    pub vpc_id: AttributeRef,
    pub vpc_cidr: AttributeRef,
    pub public_subnets: AttributeRef,
    pub private_subnets: AttributeRef,
}

/// VPC across two AZs with one NAT gateway, public and private-with-egress
/// subnets
pub fn declare(deployment: &mut Deployment, config: &DeployConfig) -> Network {
    let locality = deployment.context().locality(&config.regions.primary);
    let handle = deployment.declare(
        NETWORK,
        locality,
        vec![
            ResourceIntent::new("CmsVpc", ResourceKind::Vpc)
                .with("max_azs", 2u32)
                .with("nat_gateways", 1u32)
                .with("subnet.public", "public-subnet")
                .with("subnet.private", "private-subnet")
                .with("subnet.private.type", "PRIVATE_WITH_EGRESS"),
        ],
    );

    Network {
        handle,
        vpc_id: deployment.export(handle, "vpc_id", Value::local("CmsVpc", "id")),
        vpc_cidr: deployment.export(handle, "vpc_cidr", Value::local("CmsVpc", "cidr")),
        public_subnets: deployment.export(
            handle,
            "public_subnets",
            Value::local("CmsVpc", "public_subnets"),
        ),
        private_subnets: deployment.export(
            handle,
            "private_subnets",
            Value::local("CmsVpc", "private_subnets"),
        ),
    }
}
