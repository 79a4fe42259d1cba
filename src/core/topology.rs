//! CE-007: The csenv deployment shape.
//!
//! Turns deployment parameters into the declared entity set: one network
//! block with public and private subnets in every zone, an administrator
//! role, a bastion host, one managed IDE environment per owner, and a
//! search cluster spread over the private subnets of the first
//! `searchZoneCount` zones.

use super::addressing::{plan_subnets, SubnetRequest};
use super::error::PlanError;
use super::params::{check_params, DeploymentParams};
use super::policy::{RoleBuilder, SecurityGroupBuilder};
use super::resolver::Declarations;
use super::types::*;

pub const NETWORK: &str = "vpc";
pub const ADMIN_ROLE: &str = "admin-role";
pub const BASTION_GROUP: &str = "bastion-sg";
pub const BASTION: &str = "bastion";
pub const SEARCH_GROUP: &str = "search-sg";
pub const SEARCH: &str = "search";

const ADMIN_POLICY: &str = "AdministratorAccess";
const COMPUTE_SERVICE: &str = "ec2.amazonaws.com";
const IMAGE_FAMILY: &str = "amazon-linux-2";

/// Name of the managed environment for the `i`-th owner (0-based).
pub fn environment_name(i: usize) -> String {
    if i == 0 {
        "ide".to_string()
    } else {
        format!("ide-{}", i + 1)
    }
}

/// Declare every entity of the topology, in declaration order.
///
/// Parameters are validated first; the first input problem is returned
/// before any addressing is attempted.
pub fn declare(params: &DeploymentParams) -> Result<Declarations, PlanError> {
    check_params(params)?;

    let zones = params.zones();
    let block = NetworkBlock {
        name: NETWORK.to_string(),
        cidr: params.network_cidr()?,
        max_azs: u8::try_from(params.available_zones().len()).unwrap_or(u8::MAX),
        depends_on: vec![],
    };
    let subnets = plan_subnets(
        &block,
        &zones,
        &[
            SubnetRequest::new("public", Classification::Public, params.subnet_mask),
            SubnetRequest::new("private", Classification::Private, params.subnet_mask),
        ],
    )?;

    let first_public = subnets
        .iter()
        .find(|s| s.classification == Classification::Public)
        .map(|s| s.name.clone())
        .ok_or_else(|| PlanError::input("azCount", "no public subnet was planned"))?;
    let search_subnets: Vec<String> = subnets
        .iter()
        .filter(|s| {
            s.classification == Classification::Private
                && s.zone.index < params.search_zone_count
        })
        .map(|s| s.name.clone())
        .collect();

    let mut decls = Declarations::new();
    decls.declare(Entity::Network(block))?;
    for subnet in subnets {
        decls.declare(Entity::Subnet(subnet))?;
    }

    decls.declare(Entity::Role(
        RoleBuilder::new(ADMIN_ROLE)
            .managed_policy(ADMIN_POLICY)
            .assumed_by(Principal::Service(COMPUTE_SERVICE.to_string()))
            .build()?,
    ))?;

    decls.declare(Entity::SecurityGroup(
        SecurityGroupBuilder::new(BASTION_GROUP, NETWORK)
            .description("Allow ssh access to ec2 instances")
            .allow_all_outbound(true)
            .ingress(
                "ssh",
                Peer::AnyIpv4,
                Port::tcp(22),
                "allow ssh access from the world",
            )
            .ingress("icmp", Peer::AnyIpv4, Port::all_icmp(), "allow icmp")
            .build()?,
    ))?;

    decls.declare(Entity::Compute(ComputeNode {
        name: BASTION.to_string(),
        size: params.instance_size_bastion,
        image: MachineImage {
            family: IMAGE_FAMILY.to_string(),
            cpu: params.bastion_cpu_type,
        },
        network: NETWORK.to_string(),
        subnet: first_public.clone(),
        security_groups: vec![BASTION_GROUP.to_string()],
        role: Some(ADMIN_ROLE.to_string()),
        depends_on: vec![],
    }))?;

    for (i, owner) in params.owners().enumerate() {
        decls.declare(Entity::Environment(ManagedEnvironment {
            name: environment_name(i),
            size: params.instance_size_environment,
            subnet: first_public.clone(),
            owner: owner.to_string(),
            auto_stop_minutes: params.environment_auto_stop_minutes,
            depends_on: vec![],
        }))?;
    }

    decls.declare(Entity::SecurityGroup(
        SecurityGroupBuilder::new(SEARCH_GROUP, NETWORK)
            .description("Allow access to opensearch domain")
            .allow_all_outbound(true)
            .ingress("tcp", Peer::AnyIpv4, Port::all_tcp(), "allow tcp")
            .build()?,
    ))?;

    decls.declare(Entity::SearchCluster(SearchCluster {
        name: SEARCH.to_string(),
        engine_version: params.search_engine_version.clone(),
        zone_awareness: params.search_zone_count > 1,
        data_node_count: params.search_data_node_count,
        data_node_size: params.instance_size_search,
        master_node_size: params.search_master_node_size,
        network: NETWORK.to_string(),
        subnets: search_subnets,
        security_groups: vec![SEARCH_GROUP.to_string()],
        removal_policy: params.search_removal_policy,
        depends_on: vec![],
    }))?;

    tracing::debug!(
        topology = %params.name,
        entities = decls.len(),
        zones = zones.len(),
        "topology declared"
    );
    Ok(decls)
}
