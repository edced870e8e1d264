//! Backup store: pre-write generation capture with bounded retention
//!
//! One flat directory per deployment, one file per backup generation named
//! `<sanitized-resource>__<UTC millis>.bak`. A resource that did not exist
//! at capture time is recorded as an `.absent` marker so that restoring it
//! deletes the file the transaction created.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// One retained historical copy of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupGeneration {
    /// Resource the backup was taken of
    pub resource: PathBuf,
    /// Backup file (or absent marker) in the backup directory
    pub backup_path: PathBuf,
    /// Capture time, UTC milliseconds
    pub timestamp_millis: i64,
    /// The resource did not exist when the backup was captured
    pub absent: bool,
}

/// Backup storage rooted at a directory, keeping the most recent
/// `retention` generations per resource
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    retention: usize,
}

impl BackupStore {
    /// Create a store writing into `dir`, keeping `retention` generations
    /// per resource. A retention of zero is treated as one: the generation
    /// backing an open transaction's rollback is never pruned.
    pub fn new<P: AsRef<Path>>(dir: P, retention: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            retention: retention.max(1),
        }
    }

    /// Backup directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the current content of `resource` as a new generation.
    ///
    /// Pruning of generations beyond the retention count happens only after
    /// the new backup has been written, never before.
    pub fn capture(&self, resource: &Path) -> Result<BackupGeneration> {
        fs::create_dir_all(&self.dir)?;

        let stem = sanitize(resource);
        let absent = !resource.exists();
        let extension = if absent { "absent" } else { "bak" };

        // Stamps must stay strictly monotonic per resource: a wall-clock
        // stamp at or below a surviving generation's would sort the newest
        // capture as oldest and hand it straight to the prune pass.
        let mut millis = chrono::Utc::now().timestamp_millis();
        if let Some(newest) = self.generations(resource)?.last() {
            millis = millis.max(newest.timestamp_millis + 1);
        }
        let backup_path = self.dir.join(format!("{}__{}.{}", stem, millis, extension));

        if absent {
            fs::write(&backup_path, b"").map_err(|e| Error::Backup {
                path: resource.to_path_buf(),
                source: e,
            })?;
        } else {
            fs::copy(resource, &backup_path).map_err(|e| Error::Backup {
                path: resource.to_path_buf(),
                source: e,
            })?;
        }

        self.prune(resource)?;

        Ok(BackupGeneration {
            resource: resource.to_path_buf(),
            backup_path,
            timestamp_millis: millis,
            absent,
        })
    }

    /// Restore a resource from a specific generation, byte for byte.
    ///
    /// Restoring an absent-marker generation deletes the resource.
    pub fn restore(&self, generation: &BackupGeneration) -> Result<()> {
        if generation.absent {
            if generation.resource.exists() {
                fs::remove_file(&generation.resource)?;
            }
            return Ok(());
        }

        fs::copy(&generation.backup_path, &generation.resource).map_err(|e| Error::Write {
            path: generation.resource.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Restore a resource from its most recent generation
    pub fn restore_latest(&self, resource: &Path) -> Result<()> {
        let generations = self.generations(resource)?;
        let latest = generations.last().ok_or_else(|| {
            Error::Configuration(format!(
                "no backup generation found for '{}'",
                resource.display()
            ))
        })?;
        self.restore(latest)
    }

    /// Generations for one resource, oldest first
    pub fn generations(&self, resource: &Path) -> Result<Vec<BackupGeneration>> {
        let stem = sanitize(resource);
        let mut generations = Vec::new();

        if !self.dir.exists() {
            return Ok(generations);
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(generation) = parse_generation(&path, &stem, resource) {
                generations.push(generation);
            }
        }

        generations.sort_by_key(|g| g.timestamp_millis);
        Ok(generations)
    }

    /// Sanitized resource identifiers that have at least one generation,
    /// sorted
    pub fn resources(&self) -> Result<Vec<String>> {
        let mut stems = Vec::new();

        if !self.dir.exists() {
            return Ok(stems);
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if let Some((stem, _)) = name.rsplit_once("__") {
                    if !stems.iter().any(|s| s == stem) {
                        stems.push(stem.to_string());
                    }
                }
            }
        }

        stems.sort();
        Ok(stems)
    }

    fn prune(&self, resource: &Path) -> Result<()> {
        let generations = self.generations(resource)?;
        if generations.len() <= self.retention {
            return Ok(());
        }

        let excess = generations.len() - self.retention;
        for old in &generations[..excess] {
            fs::remove_file(&old.backup_path)?;
        }
        Ok(())
    }
}

fn sanitize(resource: &Path) -> String {
    resource
        .to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

fn parse_generation(path: &Path, stem: &str, resource: &Path) -> Option<BackupGeneration> {
    let extension = path.extension().and_then(|e| e.to_str())?;
    let absent = match extension {
        "bak" => false,
        "absent" => true,
        _ => return None,
    };

    let file_stem = path.file_stem().and_then(|s| s.to_str())?;
    let (name, stamp) = file_stem.rsplit_once("__")?;
    if name != stem {
        return None;
    }

    Some(BackupGeneration {
        resource: resource.to_path_buf(),
        backup_path: path.to_path_buf(),
        timestamp_millis: stamp.parse().ok()?,
        absent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"), 3);

        let resource = dir.path().join("item_svr.csv");
        let original = b"id,name\n1,Sword\n2,\"Axe, heavy\"\n";
        fs::write(&resource, original).unwrap();

        let generation = store.capture(&resource).unwrap();
        fs::write(&resource, b"id,name\n1,Mangled\n").unwrap();

        store.restore(&generation).unwrap();
        assert_eq!(fs::read(&resource).unwrap(), original);
    }

    #[test]
    fn test_restore_absent_generation_deletes_resource() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"), 3);

        let resource = dir.path().join("new_table.csv");
        let generation = store.capture(&resource).unwrap();
        assert!(generation.absent);

        fs::write(&resource, b"id\n1\n").unwrap();
        store.restore(&generation).unwrap();
        assert!(!resource.exists());
    }

    #[test]
    fn test_retention_prunes_oldest_after_capture() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"), 2);

        let resource = dir.path().join("item.csv");
        for i in 0..4 {
            fs::write(&resource, format!("id\n{}\n", i)).unwrap();
            store.capture(&resource).unwrap();
        }

        let generations = store.generations(&resource).unwrap();
        assert_eq!(generations.len(), 2);

        // The survivors are the two newest captures.
        let latest = generations.last().unwrap();
        assert_eq!(fs::read_to_string(&latest.backup_path).unwrap(), "id\n3\n");
    }

    #[test]
    fn test_capture_stamps_stay_monotonic_under_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"), 2);

        // Captures in a tight loop land in the same wall-clock millisecond;
        // a pruned stamp must never be reused for a newer generation.
        let resource = dir.path().join("item.csv");
        for i in 0..5 {
            fs::write(&resource, format!("id\n{}\n", i)).unwrap();
            store.capture(&resource).unwrap();
        }

        let generations = store.generations(&resource).unwrap();
        assert_eq!(generations.len(), 2);
        assert!(generations
            .windows(2)
            .all(|w| w[0].timestamp_millis < w[1].timestamp_millis));

        // The newest capture survives the prune pass.
        let latest = generations.last().unwrap();
        assert_eq!(fs::read_to_string(&latest.backup_path).unwrap(), "id\n4\n");
    }

    #[test]
    fn test_restore_latest_uses_newest_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"), 5);

        let resource = dir.path().join("item.csv");
        fs::write(&resource, "id\n1\n").unwrap();
        store.capture(&resource).unwrap();
        fs::write(&resource, "id\n2\n").unwrap();
        store.capture(&resource).unwrap();

        fs::write(&resource, "id\nbroken\n").unwrap();
        store.restore_latest(&resource).unwrap();
        assert_eq!(fs::read_to_string(&resource).unwrap(), "id\n2\n");
    }

    #[test]
    fn test_generations_for_unknown_resource_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"), 3);
        let generations = store.generations(Path::new("/no/such/file.csv")).unwrap();
        assert!(generations.is_empty());
    }
}
