//! CE-010: Provisioning driver. Applies a plan through a cloud provider.
//!
//! An entity's `ensure_resource` call is issued only after every one of its
//! dependencies succeeded. Independent branches run concurrently up to the
//! configured parallelism. The first failure stops new calls; calls already
//! in flight are allowed to finish. Nothing is rolled back or retried.

use super::error::{DriverError, ProviderFailure};
use super::types::*;
use crate::provider::{CloudProvider, ResourceDefinition};
use crate::tripwire::eventlog;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Configuration for an apply or destroy run.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum concurrent provider calls. 1 applies strictly in plan order.
    pub parallelism: usize,
    /// Stop issuing calls once this much time has passed.
    pub deadline: Option<Duration>,
    /// Append provenance events to `events.jsonl` in this directory.
    pub event_dir: Option<PathBuf>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            deadline: None,
            event_dir: None,
        }
    }
}

/// Cancellation signal shared between the caller and a running driver.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the driver to stop issuing new calls.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Outcome of an apply run.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub run_id: String,
    /// Converged entities, in plan order
    pub succeeded: Vec<ResourceIdentity>,
    pub failures: Vec<ProviderFailure>,
    /// Entities never handed to the provider, in plan order
    pub not_attempted: Vec<String>,
    pub cancelled: bool,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.not_attempted.is_empty() && !self.cancelled
    }
}

/// Outcome of a destroy run.
#[derive(Debug, Clone)]
pub struct DestroyReport {
    pub run_id: String,
    /// Destroyed entities, in destroy order
    pub destroyed: Vec<ResourceIdentity>,
    /// Kept by a retain removal policy, or needed by something that is
    pub retained: Vec<String>,
    pub failure: Option<ProviderFailure>,
    pub not_attempted: Vec<String>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl DestroyReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

type EnsureOutcome = (String, Result<ResourceIdentity, ProviderFailure>, Duration);

/// Applies and destroys plans through a [`CloudProvider`].
pub struct Driver {
    provider: Arc<dyn CloudProvider>,
}

impl Driver {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Converge every planned entity, respecting dependencies.
    pub async fn apply(
        &self,
        plan: &Plan,
        options: &ApplyOptions,
        cancel: &CancelHandle,
    ) -> ApplyReport {
        let start = Instant::now();
        let run_id = eventlog::generate_run_id();
        let events = EventSink::new(options.event_dir.as_deref(), &plan.name);
        let parallelism = options.parallelism.max(1);
        events.emit(ProvenanceEvent::ApplyStarted {
            topology: plan.name.clone(),
            run_id: run_id.clone(),
            csenv_version: env!("CARGO_PKG_VERSION").to_string(),
        });
        tracing::info!(
            topology = %plan.name,
            run_id = %run_id,
            provider = self.provider.name(),
            entities = plan.entities.len(),
            parallelism,
            "apply started"
        );

        let deadline = options.deadline.map(|d| tokio::time::Instant::now() + d);
        let mut cancel_rx = cancel.subscribe();
        let mut cancel_open = true;

        let mut started = vec![false; plan.entities.len()];
        let mut done: HashMap<String, ResourceIdentity> = HashMap::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut failures: Vec<ProviderFailure> = Vec::new();
        let mut cancelled = cancel.is_cancelled();
        let mut timed_out = false;
        let mut halted = cancelled;
        let mut tasks: JoinSet<EnsureOutcome> = JoinSet::new();

        loop {
            if !halted {
                for (i, planned) in plan.entities.iter().enumerate() {
                    if tasks.len() >= parallelism {
                        break;
                    }
                    if started[i] || !planned.dependencies.iter().all(|d| done.contains_key(d)) {
                        continue;
                    }
                    started[i] = true;
                    let definition = match ResourceDefinition::from_planned(planned) {
                        Ok(d) => d,
                        Err(failure) => {
                            events.resource_failed(&failure);
                            failures.push(failure);
                            halted = true;
                            break;
                        }
                    };
                    let dependencies: Vec<ResourceIdentity> = planned
                        .dependencies
                        .iter()
                        .filter_map(|d| done.get(d).cloned())
                        .collect();
                    events.emit(ProvenanceEvent::ResourceStarted {
                        topology: plan.name.clone(),
                        resource: definition.name.clone(),
                        kind: definition.kind,
                    });
                    tracing::debug!(
                        resource = %definition.name,
                        action = %planned.action,
                        "ensure"
                    );
                    in_flight.insert(definition.name.clone());

                    let provider = Arc::clone(&self.provider);
                    tasks.spawn(async move {
                        let t = Instant::now();
                        let result = provider.ensure_resource(&definition, &dependencies).await;
                        (definition.name, result, t.elapsed())
                    });
                }
            }

            if tasks.is_empty() {
                break;
            }

            let sleep =
                tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now));
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, Ok(identity), elapsed))) => {
                        in_flight.remove(&name);
                        let hash = plan.get(&name).map(|p| p.hash.clone()).unwrap_or_default();
                        tracing::info!(resource = %name, id = %identity.id, "converged");
                        events.emit(ProvenanceEvent::ResourceConverged {
                            topology: plan.name.clone(),
                            resource: name.clone(),
                            id: identity.id.clone(),
                            duration_seconds: elapsed.as_secs_f64(),
                            hash,
                        });
                        done.insert(name, identity);
                    }
                    Some(Ok((name, Err(failure), _))) => {
                        in_flight.remove(&name);
                        tracing::error!(
                            resource = %name,
                            reason = %failure.reason,
                            "ensure failed; halting"
                        );
                        events.resource_failed(&failure);
                        failures.push(failure);
                        halted = true;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "provider task aborted; halting");
                        halted = true;
                    }
                    None => break,
                },
                changed = cancel_rx.changed(), if cancel_open && !halted => match changed {
                    Ok(()) => {
                        if *cancel_rx.borrow() {
                            tracing::warn!("apply cancelled; waiting for in-flight calls");
                            cancelled = true;
                            halted = true;
                        }
                    }
                    Err(_) => cancel_open = false,
                },
                _ = sleep, if deadline.is_some() && !halted => {
                    tracing::warn!("apply deadline reached; waiting for in-flight calls");
                    timed_out = true;
                    cancelled = true;
                    halted = true;
                }
            }
        }

        // Anything still marked in flight belonged to an aborted task
        for planned in &plan.entities {
            if in_flight.contains(planned.name()) {
                let failure = ProviderFailure::new(planned.name(), "provider task aborted");
                events.resource_failed(&failure);
                failures.push(failure);
            }
        }

        let succeeded: Vec<ResourceIdentity> = plan
            .entities
            .iter()
            .filter_map(|p| done.get(p.name()).cloned())
            .collect();
        let not_attempted: Vec<String> = plan
            .entities
            .iter()
            .zip(&started)
            .filter(|(_, &s)| !s)
            .map(|(p, _)| p.name().to_string())
            .collect();

        let duration = start.elapsed();
        events.emit(ProvenanceEvent::ApplyCompleted {
            topology: plan.name.clone(),
            run_id: run_id.clone(),
            resources_converged: succeeded.len() as u32,
            resources_failed: failures.len() as u32,
            resources_not_attempted: not_attempted.len() as u32,
            cancelled,
            total_seconds: duration.as_secs_f64(),
        });
        tracing::info!(
            converged = succeeded.len(),
            failed = failures.len(),
            not_attempted = not_attempted.len(),
            cancelled,
            "apply finished"
        );

        ApplyReport {
            run_id,
            succeeded,
            failures,
            not_attempted,
            cancelled,
            timed_out,
            duration,
        }
    }

    /// Destroy live entities in reverse plan order, halting on the first
    /// failure. Entities with a retain policy are kept along with
    /// everything they depend on.
    pub async fn destroy(
        &self,
        plan: &Plan,
        options: &ApplyOptions,
        cancel: &CancelHandle,
    ) -> DestroyReport {
        let start = Instant::now();
        let run_id = eventlog::generate_run_id();
        let events = EventSink::new(options.event_dir.as_deref(), &plan.name);
        let retained = retained_set(plan);
        tracing::info!(topology = %plan.name, run_id = %run_id, "destroy started");

        let mut destroyed = Vec::new();
        let mut kept = Vec::new();
        let mut failure = None;
        let mut not_attempted = Vec::new();
        let mut cancelled = false;

        for planned in plan.entities.iter().rev() {
            let name = planned.name();
            if failure.is_some() || cancelled {
                not_attempted.push(name.to_string());
                continue;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                not_attempted.push(name.to_string());
                continue;
            }
            if retained.contains(name) {
                tracing::info!(resource = %name, "retained");
                kept.push(name.to_string());
                continue;
            }
            let result = match self.provider.find_resource(name).await {
                Ok(Some(identity)) => self
                    .provider
                    .destroy_resource(&identity)
                    .await
                    .map(|()| Some(identity)),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
            match result {
                Ok(Some(identity)) => {
                    tracing::info!(resource = %name, id = %identity.id, "destroyed");
                    events.emit(ProvenanceEvent::ResourceDestroyed {
                        topology: plan.name.clone(),
                        resource: name.to_string(),
                        id: identity.id.clone(),
                    });
                    destroyed.push(identity);
                }
                Ok(None) => tracing::debug!(resource = %name, "not live"),
                Err(e) => {
                    tracing::error!(
                        resource = %name,
                        reason = %e.reason,
                        "destroy failed; halting"
                    );
                    events.resource_failed(&e);
                    failure = Some(e);
                }
            }
        }

        events.emit(ProvenanceEvent::DestroyCompleted {
            topology: plan.name.clone(),
            run_id: run_id.clone(),
            resources_destroyed: destroyed.len() as u32,
            resources_failed: u32::from(failure.is_some()),
        });

        DestroyReport {
            run_id,
            destroyed,
            retained: kept,
            failure,
            not_attempted,
            cancelled,
            duration: start.elapsed(),
        }
    }

    /// Destroy a single entity. Fails closed while any dependent is live.
    /// Returns `None` when the entity was not live.
    pub async fn destroy_entity(
        &self,
        plan: &Plan,
        name: &str,
    ) -> Result<Option<ResourceIdentity>, DriverError> {
        if plan.get(name).is_none() {
            return Err(DriverError::UnknownEntity(name.to_string()));
        }
        let mut live_dependents = Vec::new();
        for dependent in plan.dependents_of(name) {
            if self.provider.find_resource(dependent).await?.is_some() {
                live_dependents.push(dependent.to_string());
            }
        }
        if !live_dependents.is_empty() {
            return Err(DriverError::DependentsExist {
                entity: name.to_string(),
                dependents: live_dependents,
            });
        }
        let Some(identity) = self.provider.find_resource(name).await? else {
            return Ok(None);
        };
        self.provider.destroy_resource(&identity).await?;
        tracing::info!(resource = %name, id = %identity.id, "destroyed");
        Ok(Some(identity))
    }
}

/// Entities kept on destroy: retain-policy clusters and their dependencies.
fn retained_set(plan: &Plan) -> HashSet<String> {
    let mut retained = HashSet::new();
    for planned in plan.entities.iter().rev() {
        let keep = retained.contains(planned.name())
            || matches!(
                &planned.entity,
                Entity::SearchCluster(s) if s.removal_policy == RemovalPolicy::Retain
            );
        if keep {
            retained.insert(planned.name().to_string());
            retained.extend(planned.dependencies.iter().cloned());
        }
    }
    retained
}

/// Writes provenance events when an event directory is configured.
struct EventSink<'a> {
    dir: Option<&'a Path>,
    topology: &'a str,
}

impl<'a> EventSink<'a> {
    fn new(dir: Option<&'a Path>, topology: &'a str) -> Self {
        Self { dir, topology }
    }

    fn emit(&self, event: ProvenanceEvent) {
        if let Some(dir) = self.dir {
            if let Err(e) = eventlog::append_event(dir, event) {
                tracing::warn!(error = %e, "cannot write provenance event");
            }
        }
    }

    fn resource_failed(&self, failure: &ProviderFailure) {
        self.emit(ProvenanceEvent::ResourceFailed {
            topology: self.topology.to_string(),
            resource: failure.entity.clone(),
            error: failure.reason.clone(),
        });
    }
}
