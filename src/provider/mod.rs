//! CE-010: Cloud provider abstraction.
//!
//! The driver reaches the cloud only through [`CloudProvider`]. Every call
//! is an idempotent "ensure": asking twice for the same definition returns
//! the same identity and creates nothing new.

pub mod local;
pub mod memory;

use crate::core::error::ProviderFailure;
use crate::core::types::{EntityKind, PlannedEntity, ResourceIdentity};
use crate::tripwire::hasher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the provider is asked to converge for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
    pub kind: EntityKind,
    /// BLAKE3 hash of the entity definition
    pub hash: String,
    /// Entities whose identities must accompany the call
    pub dependencies: Vec<String>,
    /// Full entity definition
    pub spec: serde_json::Value,
}

impl ResourceDefinition {
    pub fn from_planned(planned: &PlannedEntity) -> Result<Self, ProviderFailure> {
        let spec = serde_json::to_value(&planned.entity)
            .map_err(|e| ProviderFailure::new(planned.name(), format!("serialize error: {}", e)))?;
        Ok(Self {
            name: planned.name().to_string(),
            kind: planned.kind(),
            hash: planned.hash.clone(),
            dependencies: planned.dependencies.clone(),
            spec,
        })
    }

    /// Fail unless every dependency has an identity in `identities`.
    pub fn check_dependencies(
        &self,
        identities: &[ResourceIdentity],
    ) -> Result<(), ProviderFailure> {
        for dep in &self.dependencies {
            if !identities.iter().any(|i| &i.name == dep) {
                return Err(ProviderFailure::new(
                    &self.name,
                    format!("dependency '{}' has no identity", dep),
                ));
            }
        }
        Ok(())
    }
}

/// Cloud provider abstraction.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name (e.g., "memory", "local")
    fn name(&self) -> &str;

    /// Create or update the resource so it matches `definition`.
    async fn ensure_resource(
        &self,
        definition: &ResourceDefinition,
        dependencies: &[ResourceIdentity],
    ) -> Result<ResourceIdentity, ProviderFailure>;

    /// Remove a live resource. Removing an absent resource succeeds.
    async fn destroy_resource(&self, identity: &ResourceIdentity) -> Result<(), ProviderFailure>;

    /// Look up a live resource by entity name.
    async fn find_resource(&self, name: &str) -> Result<Option<ResourceIdentity>, ProviderFailure>;
}

/// Deterministic provider id for an entity, e.g. `subnet-3f9a0c1b2d4e`.
pub fn resource_id(kind: EntityKind, name: &str) -> String {
    let prefix = match kind {
        EntityKind::Network => "vpc",
        EntityKind::Subnet => "subnet",
        EntityKind::SecurityGroup => "sg",
        EntityKind::Role => "role",
        EntityKind::Compute => "i",
        EntityKind::Environment => "env",
        EntityKind::SearchCluster => "domain",
    };
    format!("{}-{}", prefix, hasher::short_digest(&format!("{}/{}", kind, name)))
}
