//! CE-009: Error taxonomy for planning and provisioning.
//!
//! Planning errors (`PlanError`) are raised before any provider call is made.
//! Apply-time errors (`ProviderFailure`, `DriverError`) come from the
//! provisioning driver and never from the planner.

use thiserror::Error;

/// Errors raised while validating parameters, carving address space,
/// building policies, or assembling the resource graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("invalid parameter '{field}': {reason}")]
    InputValidation { field: String, reason: String },

    #[error("network block {block} cannot fit the requested subnets: {required} addresses required, {available} available")]
    CapacityExceeded {
        block: String,
        required: u64,
        available: u64,
    },

    #[error("invalid mask /{mask} for block {block}: {reason}")]
    InvalidMask {
        mask: u8,
        block: String,
        reason: String,
    },

    #[error("security group '{group}' declares rule '{rule}' more than once")]
    DuplicateRuleName { group: String, rule: String },

    #[error("constraint '{constraint}' violated by '{entity}': {detail}")]
    ConstraintViolation {
        entity: String,
        constraint: String,
        detail: String,
    },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("'{entity}' references unknown entity '{reference}'")]
    DanglingReference { entity: String, reference: String },
}

impl PlanError {
    pub(crate) fn input(field: &str, reason: impl Into<String>) -> Self {
        Self::InputValidation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn constraint(entity: &str, constraint: &str, detail: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            entity: entity.to_string(),
            constraint: constraint.to_string(),
            detail: detail.into(),
        }
    }

    /// Name of the violated constraint, if this is a constraint violation.
    pub fn constraint_name(&self) -> Option<&str> {
        match self {
            Self::ConstraintViolation { constraint, .. } => Some(constraint),
            _ => None,
        }
    }
}

/// A failure reported by the cloud provider for one entity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("provider failed on '{entity}': {reason}")]
pub struct ProviderFailure {
    pub entity: String,
    pub reason: String,
}

impl ProviderFailure {
    pub fn new(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the driver outside of a single resource call.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("cannot destroy '{entity}': live dependents {}", dependents.join(", "))]
    DependentsExist {
        entity: String,
        dependents: Vec<String>,
    },

    #[error("'{0}' is not part of the plan")]
    UnknownEntity(String),

    #[error(transparent)]
    Provider(#[from] ProviderFailure),

    #[error("state error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
