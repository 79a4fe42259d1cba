//! CE-006: Access-policy builders for security groups and identity roles.
//!
//! Security groups must state their outbound policy. Rules open to any
//! address are tagged `RuleScope::World` so the assembler can warn on them.

use super::error::PlanError;
use super::types::{Direction, IdentityRole, Peer, Port, Principal, Rule, RuleScope, SecurityGroup};

/// Builder for a [`SecurityGroup`].
#[derive(Debug, Clone)]
pub struct SecurityGroupBuilder {
    name: String,
    network: String,
    description: String,
    allow_all_outbound: Option<bool>,
    rules: Vec<Rule>,
}

impl SecurityGroupBuilder {
    pub fn new(name: &str, network: &str) -> Self {
        Self {
            name: name.to_string(),
            network: network.to_string(),
            description: String::new(),
            allow_all_outbound: None,
            rules: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn allow_all_outbound(mut self, allow: bool) -> Self {
        self.allow_all_outbound = Some(allow);
        self
    }

    pub fn ingress(self, name: &str, peer: Peer, port: Port, description: &str) -> Self {
        self.rule(name, Direction::Ingress, peer, port, description)
    }

    pub fn egress(self, name: &str, peer: Peer, port: Port, description: &str) -> Self {
        self.rule(name, Direction::Egress, peer, port, description)
    }

    fn rule(
        mut self,
        name: &str,
        direction: Direction,
        peer: Peer,
        port: Port,
        description: &str,
    ) -> Self {
        let scope = if peer.is_world() {
            RuleScope::World
        } else {
            RuleScope::Scoped
        };
        self.rules.push(Rule {
            name: name.to_string(),
            direction,
            port,
            peer,
            description: description.to_string(),
            scope,
        });
        self
    }

    pub fn build(self) -> Result<SecurityGroup, PlanError> {
        if self.allow_all_outbound.is_none() {
            return Err(PlanError::constraint(
                &self.name,
                "explicit-outbound-policy",
                "allow_all_outbound must be set to true or false",
            ));
        }
        check_rule_names(&self.name, &self.rules)?;
        Ok(SecurityGroup {
            name: self.name,
            network: self.network,
            description: self.description,
            allow_all_outbound: self.allow_all_outbound,
            rules: self.rules,
            depends_on: vec![],
        })
    }
}

/// Fail with `DuplicateRuleName` if two rules in a group share a name.
pub fn check_rule_names(group: &str, rules: &[Rule]) -> Result<(), PlanError> {
    for (i, rule) in rules.iter().enumerate() {
        if rules[..i].iter().any(|r| r.name == rule.name) {
            return Err(PlanError::DuplicateRuleName {
                group: group.to_string(),
                rule: rule.name.clone(),
            });
        }
    }
    Ok(())
}

/// Builder for an [`IdentityRole`].
#[derive(Debug, Clone)]
pub struct RoleBuilder {
    name: String,
    managed_policies: Vec<String>,
    assumed_by: Vec<Principal>,
}

impl RoleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            managed_policies: Vec::new(),
            assumed_by: Vec::new(),
        }
    }

    pub fn managed_policy(mut self, policy: &str) -> Self {
        if !self.managed_policies.iter().any(|p| p == policy) {
            self.managed_policies.push(policy.to_string());
        }
        self
    }

    pub fn assumed_by(mut self, principal: Principal) -> Self {
        self.assumed_by.push(principal);
        self
    }

    pub fn build(self) -> Result<IdentityRole, PlanError> {
        if self.assumed_by.len() > 1 {
            return Err(PlanError::constraint(
                &self.name,
                "single-assumable-by",
                format!("{} principals declared, at most one allowed", self.assumed_by.len()),
            ));
        }
        Ok(IdentityRole {
            name: self.name,
            managed_policies: self.managed_policies,
            assumed_by: self.assumed_by,
            depends_on: vec![],
        })
    }
}
