//! csenv: a dependency-ordered planner for a cloud network topology.
//!
//! Carves an address block into per-zone subnets, builds least-privilege
//! security groups, assembles every resource into a validated creation order,
//! and drives an idempotent provider through it. BLAKE3 definition hashes
//! make re-applies no-ops.

pub mod cli;
pub mod core;
pub mod provider;
pub mod tripwire;
