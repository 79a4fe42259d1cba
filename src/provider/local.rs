//! CE-012: Local provider backed by the lock file.
//!
//! Records converged resources in `csenv.lock.yaml` instead of calling a
//! cloud API. The lock is rewritten atomically after every change, so an
//! interrupted apply leaves every finished resource recorded.

use super::{resource_id, CloudProvider, ResourceDefinition};
use crate::core::error::ProviderFailure;
use crate::core::state;
use crate::core::types::{ResourceIdentity, StateLock};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct LocalProvider {
    state_dir: PathBuf,
    lock: Mutex<StateLock>,
}

impl LocalProvider {
    /// Open the state directory, starting from an empty lock if none exists.
    pub fn open(state_dir: &Path) -> Result<Self, String> {
        let lock = state::load_lock(state_dir)?.unwrap_or_else(state::new_lock);
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            lock: Mutex::new(lock),
        })
    }

    /// Snapshot of the current lock.
    pub fn lock_snapshot(&self) -> StateLock {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StateLock> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Save `next` and only then make it the in-memory lock, so a failed
    /// write leaves both copies as they were.
    fn commit(
        &self,
        entity: &str,
        current: &mut StateLock,
        next: StateLock,
    ) -> Result<(), ProviderFailure> {
        state::save_lock(&self.state_dir, &next).map_err(|e| ProviderFailure::new(entity, e))?;
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn ensure_resource(
        &self,
        definition: &ResourceDefinition,
        dependencies: &[ResourceIdentity],
    ) -> Result<ResourceIdentity, ProviderFailure> {
        definition.check_dependencies(dependencies)?;
        let mut lock = self.lock();

        if let Some(rl) = lock.resources.get(&definition.name) {
            if rl.hash == definition.hash {
                return Ok(ResourceIdentity {
                    name: definition.name.clone(),
                    kind: rl.kind,
                    id: rl.id.clone(),
                });
            }
        }

        let id = lock
            .resources
            .get(&definition.name)
            .map(|rl| rl.id.clone())
            .unwrap_or_else(|| resource_id(definition.kind, &definition.name));
        let mut next = lock.clone();
        state::record_converged(
            &mut next,
            &definition.name,
            definition.kind,
            &id,
            &definition.hash,
            &definition.dependencies,
        );
        self.commit(&definition.name, &mut lock, next)?;
        tracing::debug!(resource = %definition.name, id = %id, "recorded in lock");
        Ok(ResourceIdentity {
            name: definition.name.clone(),
            kind: definition.kind,
            id,
        })
    }

    async fn destroy_resource(&self, identity: &ResourceIdentity) -> Result<(), ProviderFailure> {
        let mut lock = self.lock();
        let mut next = lock.clone();
        if state::record_destroyed(&mut next, &identity.name).is_none() {
            return Ok(());
        }
        self.commit(&identity.name, &mut lock, next)
    }

    async fn find_resource(&self, name: &str) -> Result<Option<ResourceIdentity>, ProviderFailure> {
        Ok(self.lock().resources.get(name).map(|rl| ResourceIdentity {
            name: name.to_string(),
            kind: rl.kind,
            id: rl.id.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EntityKind;

    fn def(name: &str, hash: &str) -> ResourceDefinition {
        ResourceDefinition {
            name: name.to_string(),
            kind: EntityKind::Network,
            hash: hash.to_string(),
            dependencies: vec![],
            spec: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_ce012_ensure_persists_lock() {
        let dir = tempfile::tempdir().unwrap();
        let p = LocalProvider::open(dir.path()).unwrap();
        let id = p.ensure_resource(&def("vpc", "blake3:a"), &[]).await.unwrap();
        assert!(id.id.starts_with("vpc-"));

        let lock = state::load_lock(dir.path()).unwrap().unwrap();
        assert_eq!(lock.resources["vpc"].hash, "blake3:a");
        assert_eq!(lock.resources["vpc"].id, id.id);
    }

    #[tokio::test]
    async fn test_ce012_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let p = LocalProvider::open(dir.path()).unwrap();
            p.ensure_resource(&def("vpc", "blake3:a"), &[]).await.unwrap()
        };
        let p = LocalProvider::open(dir.path()).unwrap();
        assert_eq!(p.find_resource("vpc").await.unwrap(), Some(first.clone()));
        let again = p.ensure_resource(&def("vpc", "blake3:b"), &[]).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(p.lock_snapshot().resources["vpc"].hash, "blake3:b");
    }

    #[tokio::test]
    async fn test_ce012_destroy_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let p = LocalProvider::open(dir.path()).unwrap();
        let id = p.ensure_resource(&def("vpc", "blake3:a"), &[]).await.unwrap();
        p.destroy_resource(&id).await.unwrap();
        assert!(p.find_resource("vpc").await.unwrap().is_none());
        let lock = state::load_lock(dir.path()).unwrap().unwrap();
        assert!(lock.resources.is_empty());
    }

    #[tokio::test]
    async fn test_ce012_failed_write_leaves_lock_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let p = LocalProvider::open(&state_dir).unwrap();
        // A plain file where the state directory should be
        std::fs::write(&state_dir, "not a dir").unwrap();

        assert!(p.ensure_resource(&def("vpc", "blake3:a"), &[]).await.is_err());
        assert!(p.find_resource("vpc").await.unwrap().is_none());

        std::fs::remove_file(&state_dir).unwrap();
        let id = p.ensure_resource(&def("vpc", "blake3:a"), &[]).await.unwrap();
        let lock = state::load_lock(&state_dir).unwrap().unwrap();
        assert_eq!(lock.resources["vpc"].id, id.id);
    }

    #[tokio::test]
    async fn test_ce012_failed_destroy_keeps_resource() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let p = LocalProvider::open(&state_dir).unwrap();
        let id = p.ensure_resource(&def("vpc", "blake3:a"), &[]).await.unwrap();

        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, "not a dir").unwrap();
        assert!(p.destroy_resource(&id).await.is_err());
        assert_eq!(p.find_resource("vpc").await.unwrap(), Some(id.clone()));

        std::fs::remove_file(&state_dir).unwrap();
        p.destroy_resource(&id).await.unwrap();
        assert!(p.find_resource("vpc").await.unwrap().is_none());
        let lock = state::load_lock(&state_dir).unwrap().unwrap();
        assert!(lock.resources.is_empty());
    }
}
