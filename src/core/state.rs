//! CE-013: Lock file management. Load, save (atomic), path derivation.

use super::types::{EntityKind, ResourceLock, StateLock};
use std::path::{Path, PathBuf};

/// Lock file name within the state directory.
pub const LOCK_FILE: &str = "csenv.lock.yaml";

/// Derive the lock file path within the state directory.
pub fn lock_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}

/// Load the lock file. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save the lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    std::fs::create_dir_all(state_dir)
        .map_err(|e| format!("cannot create dir {}: {}", state_dir.display(), e))?;
    let path = lock_file_path(state_dir);

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Create a new empty StateLock.
pub fn new_lock() -> StateLock {
    use crate::tripwire::eventlog::now_iso8601;
    StateLock {
        schema: "1.0".to_string(),
        generated_at: now_iso8601(),
        generator: format!("csenv {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        resources: indexmap::IndexMap::new(),
    }
}

/// Record a converged resource, replacing any earlier entry in place.
pub fn record_converged(
    lock: &mut StateLock,
    name: &str,
    kind: EntityKind,
    id: &str,
    hash: &str,
    dependencies: &[String],
) {
    use crate::tripwire::eventlog::now_iso8601;
    lock.resources.insert(
        name.to_string(),
        ResourceLock {
            kind,
            id: id.to_string(),
            hash: hash.to_string(),
            applied_at: Some(now_iso8601()),
            dependencies: dependencies.to_vec(),
        },
    );
    lock.generated_at = now_iso8601();
}

/// Drop a resource from the lock. Returns the removed entry.
pub fn record_destroyed(lock: &mut StateLock, name: &str) -> Option<ResourceLock> {
    let removed = lock.resources.shift_remove(name);
    if removed.is_some() {
        lock.generated_at = crate::tripwire::eventlog::now_iso8601();
    }
    removed
}
