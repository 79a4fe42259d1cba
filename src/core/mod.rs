//! Core planning logic: parameters, addressing, policy, graph assembly, execution.

pub mod addressing;
pub mod error;
pub mod executor;
pub mod params;
pub mod planner;
pub mod policy;
pub mod resolver;
pub mod state;
pub mod topology;
pub mod types;
pub mod validate;
