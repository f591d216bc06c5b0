//! WordPress CMS catalog
//!
//! Five units declared against one [`Deployment`]. Everything lives in the
//! primary region except the CDN edge.

pub mod compute;
pub mod database;
pub mod edge;
pub mod governance;
pub mod network;

use orchestrator::{DeployContext, Deployment};

use crate::schema::DeployConfig;

pub const GOVERNANCE: &str = "GovernanceStack";
pub const NETWORK: &str = "CmsNetworkStack";
pub const DATABASE: &str = "CmsDatabaseStack";
pub const COMPUTE: &str = "CmsEcsStack";
pub const EDGE: &str = "CmsEdgeStack";

/// Deploy context for a configuration
pub fn context(config: &DeployConfig) -> DeployContext {
    let mut ctx = DeployContext::new(&config.app, &config.account).with_tag("Project", &config.app);
    for (key, value) in &config.tags {
        ctx = ctx.with_tag(key, value);
    }
    ctx
}

/// Declare every CMS unit
///
/// Nothing is provisioned here; the returned deployment is handed to the
/// orchestrator.
pub fn catalog(config: &DeployConfig) -> Deployment {
    let mut deployment = Deployment::new(context(config));

    let governance = governance::declare(&mut deployment, config);
    let network = network::declare(&mut deployment, config);
    deployment.depends_on(network.handle, governance);

    let database = database::declare(&mut deployment, config, &network);
    let compute = compute::declare(&mut deployment, config, &network, &database);

    let edge = edge::declare(&mut deployment, config, &compute);
    deployment.depends_on(edge, compute.handle);

    deployment
}
