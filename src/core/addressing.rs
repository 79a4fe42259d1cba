//! CE-005: Address-space planning. Carves a network block into subnets.
//!
//! Produces one subnet per (request, zone) pair. Subnets are ordered by
//! classification (public first), then by request order, then by zone index,
//! and allocated sequentially on aligned boundaries from the start of the
//! block. The same inputs always yield the same assignments.

use super::error::PlanError;
use super::types::{Classification, NetworkBlock, Subnet, Zone};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Longest mask a subnet may use.
pub const MAX_SUBNET_MASK: u8 = 28;

/// A subnet tier to create in every zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRequest {
    /// Tier name, used as the subnet name prefix (e.g. "public")
    pub name: String,
    pub classification: Classification,
    pub mask: u8,
}

impl SubnetRequest {
    pub fn new(name: &str, classification: Classification, mask: u8) -> Self {
        Self {
            name: name.to_string(),
            classification,
            mask,
        }
    }
}

/// Derive the subnet name for a tier in a zone, e.g. `public-1a`.
pub fn subnet_name(tier: &str, zone: &Zone) -> String {
    let suffix = zone
        .name
        .rsplit('-')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(&zone.name);
    format!("{}-{}", tier, suffix)
}

/// Carve `block` into subnets for every request across `zones`.
pub fn plan_subnets(
    block: &NetworkBlock,
    zones: &[Zone],
    requests: &[SubnetRequest],
) -> Result<Vec<Subnet>, PlanError> {
    if zones.is_empty() {
        return Err(PlanError::input("azCount", "at least one zone is required"));
    }
    if zones.len() > usize::from(block.max_azs) {
        return Err(PlanError::input(
            "azCount",
            format!(
                "{} zones requested but block '{}' allows at most {}",
                zones.len(),
                block.name,
                block.max_azs
            ),
        ));
    }

    let parent = block.cidr.trunc();
    for req in requests {
        check_mask(&parent, req.mask)?;
    }

    let available = block_size(parent.prefix_len());
    let required: u64 = requests
        .iter()
        .map(|r| block_size(r.mask) * zones.len() as u64)
        .sum();
    if required > available {
        return Err(capacity_exceeded(&parent, required, available));
    }

    // Stable sort keeps request order within a classification
    let mut ordered: Vec<&SubnetRequest> = requests.iter().collect();
    ordered.sort_by_key(|r| r.classification);

    let start = u64::from(u32::from(parent.network()));
    let end = start + available;
    let mut cursor = start;
    let mut subnets = Vec::with_capacity(ordered.len() * zones.len());

    for req in ordered {
        let size = block_size(req.mask);
        for zone in zones {
            let aligned = align_up(cursor, size);
            if aligned + size > end {
                return Err(capacity_exceeded(&parent, required, available));
            }
            let addr = Ipv4Addr::from(aligned as u32);
            let cidr = Ipv4Net::new(addr, req.mask).map_err(|e| PlanError::InvalidMask {
                mask: req.mask,
                block: parent.to_string(),
                reason: e.to_string(),
            })?;
            subnets.push(Subnet {
                name: subnet_name(&req.name, zone),
                network: block.name.clone(),
                zone: zone.clone(),
                classification: req.classification,
                cidr,
                depends_on: vec![],
            });
            cursor = aligned + size;
        }
    }

    Ok(subnets)
}

/// True when two networks share any address.
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

fn check_mask(parent: &Ipv4Net, mask: u8) -> Result<(), PlanError> {
    let reason = if mask < parent.prefix_len() {
        Some(format!(
            "shorter than the parent prefix /{}",
            parent.prefix_len()
        ))
    } else if mask > MAX_SUBNET_MASK {
        Some(format!("longer than /{}", MAX_SUBNET_MASK))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PlanError::InvalidMask {
            mask,
            block: parent.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn capacity_exceeded(parent: &Ipv4Net, required: u64, available: u64) -> PlanError {
    PlanError::CapacityExceeded {
        block: parent.to_string(),
        required,
        available,
    }
}

fn block_size(prefix_len: u8) -> u64 {
    1u64 << (32 - u32::from(prefix_len))
}

fn align_up(addr: u64, size: u64) -> u64 {
    addr.div_ceil(size) * size
}
