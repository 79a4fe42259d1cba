//! CE-004: Plan generation. Diff declared entities against the lock.

use super::error::PlanError;
use super::params::DeploymentParams;
use super::resolver::{assemble, Assembly, Declarations};
use super::topology;
use super::types::*;
use crate::tripwire::hasher;

/// Build the plan artifact from an assembled graph.
///
/// Entities appear in creation order with their resolved dependencies.
/// With a previous lock, each entity is marked create, update, or no-op.
pub fn plan(
    name: &str,
    decls: &Declarations,
    assembly: &Assembly,
    lock: Option<&StateLock>,
) -> Plan {
    let mut entities = Vec::with_capacity(assembly.order.len());
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut unchanged = 0u32;

    for (position, entity_name) in assembly.order.iter().enumerate() {
        let Some(entity) = decls.get(entity_name) else {
            continue;
        };
        let hash = hash_definition(entity);
        let action = determine_action(entity_name, &hash, lock);
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        entities.push(PlannedEntity {
            position,
            entity: entity.clone(),
            dependencies: entity.dependency_names(),
            hash,
            action,
        });
    }

    Plan {
        name: name.to_string(),
        entities,
        warnings: assembly.warnings.clone(),
        to_create,
        to_update,
        unchanged,
    }
}

/// Declare, assemble, and plan the csenv topology in one step.
pub fn plan_topology(
    params: &DeploymentParams,
    lock: Option<&StateLock>,
) -> Result<Plan, PlanError> {
    let decls = topology::declare(params)?;
    let assembly = assemble(&decls)?;
    let plan = plan(&params.name, &decls, &assembly, lock);
    tracing::info!(
        topology = %plan.name,
        create = plan.to_create,
        update = plan.to_update,
        unchanged = plan.unchanged,
        "plan ready"
    );
    Ok(plan)
}

fn determine_action(name: &str, hash: &str, lock: Option<&StateLock>) -> PlanAction {
    let Some(rl) = lock.and_then(|l| l.resources.get(name)) else {
        return PlanAction::Create;
    };
    if rl.hash == hash {
        PlanAction::NoOp
    } else {
        PlanAction::Update
    }
}

/// BLAKE3 hash of an entity definition.
pub fn hash_definition(entity: &Entity) -> String {
    hasher::hash_json(entity).unwrap_or_else(|_| hasher::hash_string(&format!("{:?}", entity)))
}

/// One-line human description of an entity.
pub fn describe(entity: &Entity) -> String {
    match entity {
        Entity::Network(n) => format!("network {} across up to {} zones", n.cidr, n.max_azs),
        Entity::Subnet(s) => format!("{} subnet {} in {}", s.classification, s.cidr, s.zone.name),
        Entity::SecurityGroup(g) => {
            let outbound = match g.allow_all_outbound {
                Some(true) => "all outbound",
                Some(false) => "restricted outbound",
                None => "outbound unset",
            };
            let rules: Vec<String> = g
                .rules
                .iter()
                .map(|r| format!("{} {}", r.name, r.port))
                .collect();
            if rules.is_empty() {
                format!("security group, {}", outbound)
            } else {
                format!("security group [{}], {}", rules.join(", "), outbound)
            }
        }
        Entity::Role(r) => {
            let principal = r
                .assumed_by
                .first()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "nobody".to_string());
            format!("role assumable by {} [{}]", principal, r.managed_policies.join(", "))
        }
        Entity::Compute(c) => format!("{} instance ({}) in {}", c.size, c.image, c.subnet),
        Entity::Environment(e) => format!("{} environment in {} for {}", e.size, e.subnet, e.owner),
        Entity::SearchCluster(s) => {
            let masters = match s.master_node_size {
                Some(size) => format!(", masters {}", size),
                None => String::new(),
            };
            format!(
                "{} cluster, {} x {}{}, {} subnet(s){}",
                s.engine_version,
                s.data_node_count,
                s.data_node_size,
                masters,
                s.subnets.len(),
                if s.zone_awareness { ", zone-aware" } else { "" }
            )
        }
    }
}

/// Render a plan as pretty JSON.
pub fn plan_to_json(plan: &Plan) -> Result<String, String> {
    serde_json::to_string_pretty(plan).map_err(|e| format!("JSON serialize error: {}", e))
}

/// Render a plan as YAML.
pub fn plan_to_yaml(plan: &Plan) -> Result<String, String> {
    serde_yaml_ng::to_string(plan).map_err(|e| format!("YAML serialize error: {}", e))
}
