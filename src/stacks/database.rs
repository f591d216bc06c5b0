use orchestrator::{
    AttributeRef, Deployment, Peer, Port, ResourceIntent, ResourceKind, SecurityBoundary, Unit,
    Value,
};

use super::DATABASE;
use super::network::Network;
use crate::schema::DeployConfig;

pub const DB_NAME: &str = "wordpress";

/// Exports of the database unit
#[derive(Debug, Clone)]
pub struct Database {
    pub endpoint: AttributeRef,
    pub secret_arn: AttributeRef,
}

/// MySQL instance in the private subnets with generated credentials
pub fn declare(deployment: &mut Deployment, config: &DeployConfig, network: &Network) -> Database {
    let db = &config.database;
    let locality = deployment.context().locality(&config.regions.primary);

    let boundary = SecurityBoundary::new("DbSg", "MySQL ingress only from app tier").allow_from(
        Peer::Cidr(network.vpc_cidr.import()),
        Port::tcp(3306),
        "MySQL from inside VPC",
    );

    let intents = vec![
        ResourceIntent::new("WordpressDbSecret", ResourceKind::Secret)
            .with("secret_name", "wordpress-db-credentials")
            .with("username", "wordpress")
            .with("generate_password", true)
            .with("exclude_punctuation", true),
        ResourceIntent::new("WordpressRDS", ResourceKind::DatabaseInstance)
            .with("engine", "mysql")
            .with("engine_version", &db.engine_version)
            .with("instance_type", &db.instance_type)
            .with("vpc_id", network.vpc_id.import())
            .with("subnets", network.private_subnets.import())
            .with("security_group", Value::local("DbSg", "id"))
            .with("credentials", Value::local("WordpressDbSecret", "arn"))
            .with("database_name", DB_NAME)
            .with("port", 3306u16)
            .with("allocated_storage", db.allocated_storage_gib)
            .with("max_allocated_storage", db.max_allocated_storage_gib)
            .with("multi_az", db.multi_az)
            .with("storage_encrypted", true)
            .with("deletion_protection", true)
            .with("removal_policy", "RETAIN")
            .with("backup_retention_days", db.backup_retention_days),
    ];

    let handle = deployment.add(Unit::new(DATABASE, locality, intents).with_boundary(boundary));
    deployment.export(handle, "port", Value::local("WordpressRDS", "port"));

    Database {
        endpoint: deployment.export(
            handle,
            "endpoint",
            Value::local("WordpressRDS", "endpoint"),
        ),
        secret_arn: deployment.export(
            handle,
            "secret_arn",
            Value::local("WordpressDbSecret", "arn"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::{context, network};

    #[test]
    fn test_database_imports_network() {
        let config = DeployConfig {
            account: "123456789012".to_string(),
            ..DeployConfig::default()
        };
        let mut deployment = Deployment::new(context(&config));
        let network = network::declare(&mut deployment, &config);
        let database = declare(&mut deployment, &config, &network);

        let unit = &deployment.units()[1];
        assert_eq!(unit.name, DATABASE);
        assert!(unit.validate().is_ok());
        assert_eq!(
            unit.imports(),
            vec![
                network.vpc_cidr.clone(),
                network.private_subnets.clone(),
                network.vpc_id.clone(),
            ]
        );
        assert_eq!(database.endpoint.to_string(), "CmsDatabaseStack.endpoint");
    }
}
