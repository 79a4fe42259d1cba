//! CE-011: In-memory provider.
//!
//! Deterministic and idempotent. Keeps counters and a call log so tests can
//! observe what the driver asked for, and can be told to fail on chosen
//! entities or to hold each call for a fixed delay.

use super::{resource_id, CloudProvider, ResourceDefinition};
use crate::core::error::ProviderFailure;
use crate::core::types::ResourceIdentity;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    /// Live resources and the definition hash they were converged to
    live: IndexMap<String, (ResourceIdentity, String)>,
    ensure_failures: HashMap<String, String>,
    destroy_failures: HashMap<String, String>,
    creates: u32,
    updates: u32,
    ensure_log: Vec<String>,
    destroy_log: Vec<String>,
}

/// Provider double that keeps every resource in memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a call returns.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every ensure call for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make `ensure_resource` fail for `name`.
    pub fn fail_on(&self, name: &str, reason: &str) {
        self.inner()
            .ensure_failures
            .insert(name.to_string(), reason.to_string());
    }

    /// Make `destroy_resource` fail for `name`.
    pub fn fail_destroy_on(&self, name: &str, reason: &str) {
        self.inner()
            .destroy_failures
            .insert(name.to_string(), reason.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner();
        inner.ensure_failures.clear();
        inner.destroy_failures.clear();
    }

    pub fn creates(&self) -> u32 {
        self.inner().creates
    }

    pub fn updates(&self) -> u32 {
        self.inner().updates
    }

    /// Entity names in the order `ensure_resource` was called.
    pub fn ensure_log(&self) -> Vec<String> {
        self.inner().ensure_log.clone()
    }

    /// Entity names in the order they were destroyed.
    pub fn destroy_log(&self) -> Vec<String> {
        self.inner().destroy_log.clone()
    }

    /// Names of live resources, in creation order.
    pub fn live(&self) -> Vec<String> {
        self.inner().live.keys().cloned().collect()
    }

    /// Highest number of concurrent ensure calls seen.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

#[async_trait]
impl CloudProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_resource(
        &self,
        definition: &ResourceDefinition,
        dependencies: &[ResourceIdentity],
    ) -> Result<ResourceIdentity, ProviderFailure> {
        let _guard = self.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner();
        inner.ensure_log.push(definition.name.clone());
        if let Some(reason) = inner.ensure_failures.get(&definition.name) {
            return Err(ProviderFailure::new(&definition.name, reason.clone()));
        }
        definition.check_dependencies(dependencies)?;
        for dep in dependencies {
            if !inner.live.contains_key(&dep.name) {
                return Err(ProviderFailure::new(
                    &definition.name,
                    format!("dependency '{}' ({}) is not live", dep.name, dep.id),
                ));
            }
        }

        if let Some((identity, hash)) = inner.live.get(&definition.name).cloned() {
            if hash != definition.hash {
                inner.updates += 1;
                inner
                    .live
                    .insert(definition.name.clone(), (identity.clone(), definition.hash.clone()));
            }
            return Ok(identity);
        }

        let identity = ResourceIdentity {
            name: definition.name.clone(),
            kind: definition.kind,
            id: resource_id(definition.kind, &definition.name),
        };
        inner.creates += 1;
        inner
            .live
            .insert(definition.name.clone(), (identity.clone(), definition.hash.clone()));
        Ok(identity)
    }

    async fn destroy_resource(&self, identity: &ResourceIdentity) -> Result<(), ProviderFailure> {
        let mut inner = self.inner();
        if let Some(reason) = inner.destroy_failures.get(&identity.name) {
            return Err(ProviderFailure::new(&identity.name, reason.clone()));
        }
        if inner.live.shift_remove(&identity.name).is_some() {
            inner.destroy_log.push(identity.name.clone());
        }
        Ok(())
    }

    async fn find_resource(&self, name: &str) -> Result<Option<ResourceIdentity>, ProviderFailure> {
        Ok(self.inner().live.get(name).map(|(identity, _)| identity.clone()))
    }
}
