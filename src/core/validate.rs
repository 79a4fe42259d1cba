//! CE-008: Cross-entity constraint validation and warnings.
//!
//! Constraints are checked entity by entity in declaration order and the
//! first violation stops validation. Warnings never fail the plan.

use super::addressing::overlaps;
use super::error::PlanError;
use super::policy::check_rule_names;
use super::resolver::Declarations;
use super::types::*;
use std::collections::BTreeSet;

/// Check every domain constraint; fail on the first violation.
pub fn validate(decls: &Declarations) -> Result<(), PlanError> {
    for (position, entity) in decls.iter().enumerate() {
        check_reference_kinds(decls, entity)?;
        match entity {
            Entity::Network(_) => {}
            Entity::Subnet(s) => check_subnet(decls, position, s)?,
            Entity::SecurityGroup(g) => check_security_group(g)?,
            Entity::Role(r) => check_role(r)?,
            Entity::Compute(c) => check_compute(decls, c)?,
            Entity::Environment(e) => check_environment(decls, e)?,
            Entity::SearchCluster(s) => check_search_cluster(decls, s)?,
        }
    }
    Ok(())
}

/// Collect non-blocking findings about world-reachable ingress.
pub fn warnings(decls: &Declarations) -> Vec<PlanWarning> {
    let mut warnings = Vec::new();
    for entity in decls.iter() {
        let Entity::SecurityGroup(group) = entity else {
            continue;
        };
        let world: Vec<&Rule> = group.world_ingress().collect();
        if world.len() > 1 {
            warnings.push(PlanWarning {
                entity: group.name.clone(),
                code: "multiple-world-ingress".to_string(),
                message: format!(
                    "{} ingress rules are open to any address: {}",
                    world.len(),
                    world
                        .iter()
                        .map(|r| format!("{} ({})", r.name, r.port))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }
        for rule in world {
            if rule.port.is_full_range() && rule.port.protocol != Protocol::Icmp {
                warnings.push(PlanWarning {
                    entity: group.name.clone(),
                    code: "broad-world-ingress".to_string(),
                    message: format!(
                        "rule '{}' opens every {} port to any address",
                        rule.name, rule.port.protocol
                    ),
                });
            }
        }
    }
    warnings
}

fn check_reference_kinds(decls: &Declarations, entity: &Entity) -> Result<(), PlanError> {
    for r in entity.references() {
        let (Some(expected), Some(target)) = (r.expected, decls.get(r.target)) else {
            continue;
        };
        if target.kind() != expected {
            return Err(PlanError::constraint(
                entity.name(),
                "reference-kind",
                format!(
                    "'{}' is a {}, expected a {}",
                    r.target,
                    target.kind(),
                    expected
                ),
            ));
        }
    }
    Ok(())
}

fn check_subnet(decls: &Declarations, position: usize, subnet: &Subnet) -> Result<(), PlanError> {
    if let Some(Entity::Network(net)) = decls.get(&subnet.network) {
        if !net.cidr.contains(&subnet.cidr) {
            return Err(PlanError::constraint(
                &subnet.name,
                "subnet-within-network",
                format!("{} is outside {} ({})", subnet.cidr, net.name, net.cidr),
            ));
        }
    }
    for earlier in decls.iter().take(position) {
        if let Entity::Subnet(other) = earlier {
            if overlaps(&subnet.cidr, &other.cidr) {
                return Err(PlanError::constraint(
                    &subnet.name,
                    "subnet-overlap",
                    format!("{} overlaps '{}' ({})", subnet.cidr, other.name, other.cidr),
                ));
            }
        }
    }
    Ok(())
}

fn check_security_group(group: &SecurityGroup) -> Result<(), PlanError> {
    if group.allow_all_outbound.is_none() {
        return Err(PlanError::constraint(
            &group.name,
            "explicit-outbound-policy",
            "allow_all_outbound must be set to true or false",
        ));
    }
    check_rule_names(&group.name, &group.rules)
}

fn check_role(role: &IdentityRole) -> Result<(), PlanError> {
    if role.assumed_by.len() > 1 {
        return Err(PlanError::constraint(
            &role.name,
            "single-assumable-by",
            format!(
                "{} principals declared, at most one allowed",
                role.assumed_by.len()
            ),
        ));
    }
    Ok(())
}

fn check_compute(decls: &Declarations, node: &ComputeNode) -> Result<(), PlanError> {
    if node.security_groups.is_empty() {
        return Err(PlanError::constraint(
            &node.name,
            "compute-requires-security-group",
            "at least one security group is required",
        ));
    }
    check_network_scope(decls, &node.name, &node.network, [node.subnet.as_str()])?;
    check_network_scope(
        decls,
        &node.name,
        &node.network,
        node.security_groups.iter().map(String::as_str),
    )
}

fn check_environment(decls: &Declarations, env: &ManagedEnvironment) -> Result<(), PlanError> {
    if let Some(Entity::Subnet(subnet)) = decls.get(&env.subnet) {
        if subnet.classification != Classification::Public {
            return Err(PlanError::constraint(
                &env.name,
                "managed-environment-requires-public-subnet",
                format!("'{}' is a {} subnet", subnet.name, subnet.classification),
            ));
        }
    }
    Ok(())
}

fn check_search_cluster(decls: &Declarations, cluster: &SearchCluster) -> Result<(), PlanError> {
    if cluster.subnets.is_empty() {
        return Err(PlanError::constraint(
            &cluster.name,
            "search-cluster-requires-subnet",
            "at least one subnet is required",
        ));
    }
    if cluster.data_node_count == 0 {
        return Err(PlanError::constraint(
            &cluster.name,
            "search-cluster-requires-data-node",
            "data_node_count must be at least 1",
        ));
    }
    check_network_scope(
        decls,
        &cluster.name,
        &cluster.network,
        cluster.subnets.iter().map(String::as_str),
    )?;
    check_network_scope(
        decls,
        &cluster.name,
        &cluster.network,
        cluster.security_groups.iter().map(String::as_str),
    )?;

    let zones = zones_in_use(decls, cluster);
    if cluster.zone_awareness {
        if zones < 2 {
            return Err(PlanError::constraint(
                &cluster.name,
                "zone-redundancy-requires-multiple-zones",
                format!("zone awareness is enabled but subnets span {} zone(s)", zones),
            ));
        }
        if cluster.data_node_count % zones as u32 != 0 {
            return Err(PlanError::constraint(
                &cluster.name,
                "zone-redundancy-parity",
                format!(
                    "{} data nodes cannot be spread evenly across {} zones",
                    cluster.data_node_count, zones
                ),
            ));
        }
    } else if cluster.subnets.len() > 1 {
        return Err(PlanError::constraint(
            &cluster.name,
            "single-zone-requires-single-subnet",
            format!(
                "zone awareness is disabled but {} subnets are referenced",
                cluster.subnets.len()
            ),
        ));
    }
    Ok(())
}

/// Number of distinct zones across the cluster's subnets.
pub fn zones_in_use(decls: &Declarations, cluster: &SearchCluster) -> usize {
    cluster
        .subnets
        .iter()
        .filter_map(|name| match decls.get(name) {
            Some(Entity::Subnet(s)) => Some(s.zone.name.as_str()),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .len()
}

fn check_network_scope<'a>(
    decls: &Declarations,
    entity: &str,
    network: &str,
    refs: impl IntoIterator<Item = &'a str>,
) -> Result<(), PlanError> {
    for name in refs {
        let owner = match decls.get(name) {
            Some(Entity::Subnet(s)) => &s.network,
            Some(Entity::SecurityGroup(g)) => &g.network,
            _ => continue,
        };
        if owner != network {
            return Err(PlanError::constraint(
                entity,
                "network-scope",
                format!("'{}' belongs to '{}', not '{}'", name, owner, network),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::SecurityGroupBuilder;

    fn network(name: &str, cidr: &str) -> Entity {
        Entity::Network(NetworkBlock {
            name: name.to_string(),
            cidr: cidr.parse().unwrap(),
            max_azs: 3,
            depends_on: vec![],
        })
    }

    fn subnet(name: &str, network: &str, zone: u8, class: Classification, cidr: &str) -> Entity {
        Entity::Subnet(Subnet {
            name: name.to_string(),
            network: network.to_string(),
            zone: Zone {
                index: zone,
                name: format!("us-east-1{}", (b'a' + zone) as char),
            },
            classification: class,
            cidr: cidr.parse().unwrap(),
            depends_on: vec![],
        })
    }

    fn group(name: &str, network: &str) -> Entity {
        Entity::SecurityGroup(
            SecurityGroupBuilder::new(name, network)
                .allow_all_outbound(true)
                .build()
                .unwrap(),
        )
    }

    fn cluster(subnets: &[&str], zone_awareness: bool, nodes: u32) -> Entity {
        Entity::SearchCluster(SearchCluster {
            name: "search".to_string(),
            engine_version: "OpenSearch_1.0".to_string(),
            zone_awareness,
            data_node_count: nodes,
            data_node_size: SearchInstanceSize::M6gLargeSearch,
            master_node_size: None,
            network: "vpc".to_string(),
            subnets: subnets.iter().map(|s| s.to_string()).collect(),
            security_groups: vec!["sg".to_string()],
            removal_policy: RemovalPolicy::Destroy,
            depends_on: vec![],
        })
    }

    /// vpc, 3 private subnets (zones a-c), 1 public subnet (zone a), sg.
    fn base() -> Vec<Entity> {
        vec![
            network("vpc", "10.1.0.0/16"),
            subnet("public-a", "vpc", 0, Classification::Public, "10.1.0.0/22"),
            subnet("private-a", "vpc", 0, Classification::Private, "10.1.4.0/22"),
            subnet("private-b", "vpc", 1, Classification::Private, "10.1.8.0/22"),
            subnet("private-c", "vpc", 2, Classification::Private, "10.1.12.0/22"),
            group("sg", "vpc"),
        ]
    }

    fn validate_with(extra: Vec<Entity>) -> Result<(), PlanError> {
        let mut all = base();
        all.extend(extra);
        validate(&Declarations::from_entities(all).unwrap())
    }

    fn violated(result: Result<(), PlanError>) -> Option<String> {
        result.err().and_then(|e| e.constraint_name().map(String::from))
    }

    #[test]
    fn test_ce008_base_is_valid() {
        assert!(validate_with(vec![]).is_ok());
    }

    #[test]
    fn test_ce008_parity_three_nodes_two_zones() {
        let r = validate_with(vec![cluster(&["private-a", "private-b"], true, 3)]);
        assert_eq!(violated(r).as_deref(), Some("zone-redundancy-parity"));
    }

    #[test]
    fn test_ce008_parity_iff_divisible() {
        for zones in 2..=3usize {
            let subnets = &["private-a", "private-b", "private-c"][..zones];
            for nodes in 1..=12u32 {
                let r = validate_with(vec![cluster(subnets, true, nodes)]);
                let is_parity = violated(r).as_deref() == Some("zone-redundancy-parity");
                assert_eq!(is_parity, nodes % zones as u32 != 0, "{nodes} nodes / {zones} zones");
            }
        }
    }

    #[test]
    fn test_ce008_zones_counted_not_subnets() {
        let mut extra = vec![subnet(
            "private-a2",
            "vpc",
            0,
            Classification::Private,
            "10.1.16.0/22",
        )];
        extra.push(cluster(&["private-a", "private-a2", "private-b"], true, 2));
        assert!(validate_with(extra).is_ok());
    }

    #[test]
    fn test_ce008_zone_awareness_needs_two_zones() {
        let r = validate_with(vec![cluster(&["private-a"], true, 2)]);
        assert_eq!(
            violated(r).as_deref(),
            Some("zone-redundancy-requires-multiple-zones")
        );
    }

    #[test]
    fn test_ce008_single_zone_single_subnet() {
        assert!(validate_with(vec![cluster(&["private-a"], false, 3)]).is_ok());
        let r = validate_with(vec![cluster(&["private-a", "private-b"], false, 2)]);
        assert_eq!(
            violated(r).as_deref(),
            Some("single-zone-requires-single-subnet")
        );
    }

    #[test]
    fn test_ce008_cluster_without_subnet_or_nodes() {
        let r = validate_with(vec![cluster(&[], true, 2)]);
        assert_eq!(violated(r).as_deref(), Some("search-cluster-requires-subnet"));
        let r = validate_with(vec![cluster(&["private-a", "private-b"], true, 0)]);
        assert_eq!(
            violated(r).as_deref(),
            Some("search-cluster-requires-data-node")
        );
    }

    fn environment(subnet: &str) -> Entity {
        Entity::Environment(ManagedEnvironment {
            name: "ide".to_string(),
            size: InstanceSize::T3Large,
            subnet: subnet.to_string(),
            owner: "arn:aws:iam::123456789012:user/alice".to_string(),
            auto_stop_minutes: None,
            depends_on: vec![],
        })
    }

    #[test]
    fn test_ce008_environment_public_subnet() {
        assert!(validate_with(vec![environment("public-a")]).is_ok());
        let r = validate_with(vec![environment("private-a")]);
        assert_eq!(
            violated(r).as_deref(),
            Some("managed-environment-requires-public-subnet")
        );
    }

    #[test]
    fn test_ce008_reference_kind() {
        let r = validate_with(vec![environment("sg")]);
        assert_eq!(violated(r).as_deref(), Some("reference-kind"));
    }

    #[test]
    fn test_ce008_subnet_outside_network() {
        let r = validate_with(vec![subnet(
            "stray",
            "vpc",
            0,
            Classification::Public,
            "10.2.0.0/24",
        )]);
        assert_eq!(violated(r).as_deref(), Some("subnet-within-network"));
    }

    #[test]
    fn test_ce008_subnet_overlap() {
        let r = validate_with(vec![subnet("dup", "vpc", 1, Classification::Public, "10.1.5.0/24")]);
        let err = r.unwrap_err();
        assert_eq!(err.constraint_name(), Some("subnet-overlap"));
        assert!(err.to_string().contains("private-a"));
    }

    #[test]
    fn test_ce008_implicit_outbound() {
        let sg = Entity::SecurityGroup(SecurityGroup {
            name: "loose".to_string(),
            network: "vpc".to_string(),
            description: String::new(),
            allow_all_outbound: None,
            rules: vec![],
            depends_on: vec![],
        });
        let r = validate_with(vec![sg]);
        assert_eq!(violated(r).as_deref(), Some("explicit-outbound-policy"));
    }

    #[test]
    fn test_ce008_role_principals() {
        let role = Entity::Role(IdentityRole {
            name: "admin".to_string(),
            managed_policies: vec![],
            assumed_by: vec![
                Principal::Service("ec2.amazonaws.com".to_string()),
                Principal::Arn("arn:aws:iam::123456789012:root".to_string()),
            ],
            depends_on: vec![],
        });
        let r = validate_with(vec![role]);
        assert_eq!(violated(r).as_deref(), Some("single-assumable-by"));
    }

    fn compute(subnet: &str, groups: &[&str]) -> Entity {
        Entity::Compute(ComputeNode {
            name: "bastion".to_string(),
            size: InstanceSize::T3Medium,
            image: MachineImage {
                family: "amazon-linux-2".to_string(),
                cpu: CpuType::X86_64,
            },
            network: "vpc".to_string(),
            subnet: subnet.to_string(),
            security_groups: groups.iter().map(|g| g.to_string()).collect(),
            role: None,
            depends_on: vec![],
        })
    }

    #[test]
    fn test_ce008_compute_requires_group() {
        assert!(validate_with(vec![compute("public-a", &["sg"])]).is_ok());
        let r = validate_with(vec![compute("public-a", &[])]);
        assert_eq!(
            violated(r).as_deref(),
            Some("compute-requires-security-group")
        );
    }

    #[test]
    fn test_ce008_network_scope() {
        let r = validate_with(vec![
            network("other", "10.9.0.0/16"),
            group("foreign-sg", "other"),
            compute("public-a", &["sg", "foreign-sg"]),
        ]);
        assert_eq!(violated(r).as_deref(), Some("network-scope"));
    }

    #[test]
    fn test_ce008_first_violation_in_declaration_order() {
        let r = validate_with(vec![
            environment("private-a"),
            cluster(&["private-a", "private-b"], true, 3),
        ]);
        assert_eq!(
            violated(r).as_deref(),
            Some("managed-environment-requires-public-subnet")
        );
    }

    #[test]
    fn test_ce008_warnings() {
        let bastion_sg = SecurityGroupBuilder::new("bastion-sg", "vpc")
            .allow_all_outbound(true)
            .ingress("ssh", Peer::AnyIpv4, Port::tcp(22), "")
            .ingress("icmp", Peer::AnyIpv4, Port::all_icmp(), "")
            .build()
            .unwrap();
        let search_sg = SecurityGroupBuilder::new("search-sg", "vpc")
            .allow_all_outbound(true)
            .ingress("tcp", Peer::AnyIpv4, Port::all_tcp(), "")
            .build()
            .unwrap();
        let decls = Declarations::from_entities([
            network("vpc", "10.1.0.0/16"),
            Entity::SecurityGroup(bastion_sg),
            Entity::SecurityGroup(search_sg),
        ])
        .unwrap();
        let w = warnings(&decls);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].entity, "bastion-sg");
        assert_eq!(w[0].code, "multiple-world-ingress");
        assert_eq!(w[1].entity, "search-sg");
        assert_eq!(w[1].code, "broad-world-ingress");
    }
}
