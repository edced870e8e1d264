//! Transaction manager: all-or-nothing batches of file writes
//!
//! A transaction buffers writes against a declared resource set, captures a
//! pre-write backup of every touched resource, and either lands every write
//! durably (commit) or restores every already-mutated resource (rollback).
//! Overlapping resource sets are mutually exclusive: `begin` fails while any
//! target resource belongs to another open transaction.

use crate::audit::{AuditLogger, Operation};
use crate::backup::{BackupGeneration, BackupStore};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct PendingWrite {
    path: PathBuf,
    content: String,
}

/// One open unit of work. Owned exclusively by its creator; locks are
/// released when the transaction commits, rolls back, or is dropped.
pub struct Transaction {
    id: Uuid,
    started: DateTime<Utc>,
    resources: Vec<PathBuf>,
    writes: Vec<PendingWrite>,
    captured: Vec<BackupGeneration>,
    state: TxnState,
    locks: Arc<Mutex<HashMap<PathBuf, Uuid>>>,
}

impl Transaction {
    /// Unique transaction identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start timestamp
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Declared resource paths, in declaration order
    pub fn resources(&self) -> &[PathBuf] {
        &self.resources
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxnState {
        self.state
    }

    fn release_locks(&self) {
        let mut locks = self.locks.lock();
        for resource in &self.resources {
            if locks.get(resource) == Some(&self.id) {
                locks.remove(resource);
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // A dropped open transaction has written nothing; releasing its
        // locks is enough to avoid wedging later runs.
        if self.state == TxnState::Open {
            self.state = TxnState::RolledBack;
            self.release_locks();
        }
    }
}

/// Creates and finalizes transactions, enforcing per-resource exclusivity
#[derive(Clone)]
pub struct TransactionManager {
    locks: Arc<Mutex<HashMap<PathBuf, Uuid>>>,
    backups: BackupStore,
    audit: AuditLogger,
}

impl TransactionManager {
    pub fn new(backups: BackupStore, audit: AuditLogger) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            backups,
            audit,
        }
    }

    /// Backup store backing this manager's rollbacks
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Whether a resource is currently inside an open transaction
    pub fn is_locked(&self, path: &Path) -> bool {
        self.locks.lock().contains_key(path)
    }

    /// Open a transaction over `resources`.
    ///
    /// Fails with `ResourceLocked` if any resource already belongs to an
    /// open transaction, acquiring nothing in that case.
    pub fn begin(&self, resources: Vec<PathBuf>) -> Result<Transaction> {
        let id = Uuid::new_v4();

        {
            let mut locks = self.locks.lock();
            if let Some((path, owner)) = resources
                .iter()
                .find_map(|r| locks.get(r).map(|owner| (r.clone(), *owner)))
            {
                self.audit.record(
                    self.audit
                        .entry(Operation::BeginTransaction)
                        .with_file(&path)
                        .with_success(false)
                        .with_detail(format!("resource locked by {}", owner)),
                );
                return Err(Error::ResourceLocked {
                    path,
                    txn_id: owner,
                });
            }
            for resource in &resources {
                locks.insert(resource.clone(), id);
            }
        }

        self.audit
            .record(self.audit.entry(Operation::BeginTransaction).with_txn(id));
        tracing::debug!(txn = %id, resources = resources.len(), "transaction opened");

        Ok(Transaction {
            id,
            started: Utc::now(),
            resources,
            writes: Vec::new(),
            captured: Vec::new(),
            state: TxnState::Open,
            locks: Arc::clone(&self.locks),
        })
    }

    /// Buffer a write of `content` to `path` within `txn`.
    ///
    /// The path must be part of the transaction's declared resource set.
    pub fn record_write(
        &self,
        txn: &mut Transaction,
        path: &Path,
        content: String,
    ) -> Result<()> {
        if txn.state != TxnState::Open {
            return Err(Error::Configuration(format!(
                "transaction {} is no longer open",
                txn.id
            )));
        }
        if !txn.resources.iter().any(|r| r == path) {
            return Err(Error::Configuration(format!(
                "resource '{}' is not part of transaction {}",
                path.display(),
                txn.id
            )));
        }

        txn.writes.push(PendingWrite {
            path: path.to_path_buf(),
            content,
        });
        Ok(())
    }

    /// Execute all buffered writes and finalize the transaction.
    ///
    /// Before the first mutation of each resource its pre-transaction
    /// content is captured as a backup generation. If any write fails,
    /// every already-mutated resource is restored from its backup and the
    /// transaction is marked rolled back; a restore that itself partially
    /// fails escalates as a data-safety alarm instead of an ordinary write
    /// error.
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        if txn.state != TxnState::Open {
            return Err(Error::Configuration(format!(
                "transaction {} is no longer open",
                txn.id
            )));
        }

        let writes = std::mem::take(&mut txn.writes);
        for write in &writes {
            if let Err(e) = self.apply_write(txn, write) {
                let restore_result = self.restore_captured(txn);
                txn.state = TxnState::RolledBack;
                txn.release_locks();
                self.audit.record(
                    self.audit
                        .entry(Operation::RollbackTransaction)
                        .with_txn(txn.id)
                        .with_success(restore_result.is_ok())
                        .with_detail(e.to_string()),
                );
                return match restore_result {
                    Ok(()) => Err(e),
                    Err(alarm) => Err(alarm),
                };
            }
        }

        txn.state = TxnState::Committed;
        txn.release_locks();
        self.audit.record(
            self.audit
                .entry(Operation::CommitTransaction)
                .with_txn(txn.id)
                .with_detail(format!("{} write(s)", writes.len())),
        );
        tracing::debug!(txn = %txn.id, writes = writes.len(), "transaction committed");
        Ok(())
    }

    /// Undo the transaction, restoring any resources it already mutated
    pub fn rollback(&self, txn: &mut Transaction) -> Result<()> {
        if txn.state != TxnState::Open {
            return Err(Error::Configuration(format!(
                "transaction {} is no longer open",
                txn.id
            )));
        }

        let restore_result = self.restore_captured(txn);
        txn.state = TxnState::RolledBack;
        txn.release_locks();
        self.audit.record(
            self.audit
                .entry(Operation::RollbackTransaction)
                .with_txn(txn.id)
                .with_success(restore_result.is_ok()),
        );
        restore_result
    }

    fn apply_write(&self, txn: &mut Transaction, write: &PendingWrite) -> Result<()> {
        if !txn.captured.iter().any(|g| g.resource == write.path) {
            match self.backups.capture(&write.path) {
                Ok(generation) => {
                    self.audit.record(
                        self.audit
                            .entry(Operation::CreateBackup)
                            .with_file(&write.path)
                            .with_txn(txn.id),
                    );
                    txn.captured.push(generation);
                }
                Err(e) => {
                    self.audit.record(
                        self.audit
                            .entry(Operation::CreateBackup)
                            .with_file(&write.path)
                            .with_txn(txn.id)
                            .with_success(false)
                            .with_detail(e.to_string()),
                    );
                    return Err(e);
                }
            }
        }

        match fs::write(&write.path, &write.content) {
            Ok(()) => {
                self.audit.record(
                    self.audit
                        .entry(Operation::WriteFile)
                        .with_file(&write.path)
                        .with_txn(txn.id),
                );
                Ok(())
            }
            Err(e) => {
                self.audit.record(
                    self.audit
                        .entry(Operation::WriteFile)
                        .with_file(&write.path)
                        .with_txn(txn.id)
                        .with_success(false)
                        .with_detail(e.to_string()),
                );
                Err(Error::Write {
                    path: write.path.clone(),
                    source: e,
                })
            }
        }
    }

    fn restore_captured(&self, txn: &Transaction) -> Result<()> {
        let mut failures = Vec::new();

        for generation in &txn.captured {
            match self.backups.restore(generation) {
                Ok(()) => self.audit.record(
                    self.audit
                        .entry(Operation::RestoreBackup)
                        .with_file(&generation.resource)
                        .with_txn(txn.id),
                ),
                Err(e) => {
                    self.audit.record(
                        self.audit
                            .entry(Operation::RestoreBackup)
                            .with_file(&generation.resource)
                            .with_txn(txn.id)
                            .with_success(false)
                            .with_detail(e.to_string()),
                    );
                    failures.push(format!("{}: {}", generation.resource.display(), e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            tracing::error!(
                txn = %txn.id,
                failed = failures.len(),
                "rollback left resources in an inconsistent state"
            );
            Err(Error::Restore {
                txn_id: txn.id,
                failed: failures.len(),
                details: failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;

    fn manager(dir: &Path) -> TransactionManager {
        let backups = BackupStore::new(dir.join("backups"), 3);
        let audit = AuditLogger::new(Arc::new(MemorySink::new()), "test");
        TransactionManager::new(backups, audit)
    }

    #[test]
    fn test_commit_lands_all_writes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "id\n1\n").unwrap();

        let mut txn = manager.begin(vec![a.clone(), b.clone()]).unwrap();
        manager
            .record_write(&mut txn, &a, "id\n2\n".to_string())
            .unwrap();
        manager
            .record_write(&mut txn, &b, "id\n9\n".to_string())
            .unwrap();
        manager.commit(&mut txn).unwrap();

        assert_eq!(txn.state(), TxnState::Committed);
        assert_eq!(fs::read_to_string(&a).unwrap(), "id\n2\n");
        assert_eq!(fs::read_to_string(&b).unwrap(), "id\n9\n");
        assert!(!manager.is_locked(&a));
    }

    #[test]
    fn test_failed_write_reverts_earlier_writes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let good = dir.path().join("good.csv");
        fs::write(&good, "id\n1\n").unwrap();
        // A missing parent directory lets the backup capture succeed (the
        // resource is simply absent) while the write itself fails.
        let bad = dir.path().join("missing").join("bad.csv");

        let mut txn = manager.begin(vec![good.clone(), bad.clone()]).unwrap();
        manager
            .record_write(&mut txn, &good, "id\nmutated\n".to_string())
            .unwrap();
        manager
            .record_write(&mut txn, &bad, "id\n1\n".to_string())
            .unwrap();

        let result = manager.commit(&mut txn);
        assert!(matches!(result, Err(Error::Write { .. })));
        assert_eq!(txn.state(), TxnState::RolledBack);
        // The first write was applied, then restored byte for byte.
        assert_eq!(fs::read_to_string(&good).unwrap(), "id\n1\n");
        assert!(!manager.is_locked(&good));
    }

    #[test]
    fn test_failed_backup_capture_reverts_earlier_writes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let good = dir.path().join("good.csv");
        fs::write(&good, "id\n1\n").unwrap();
        // A directory at the resource path makes the backup copy fail
        // before the write is ever attempted.
        let bad = dir.path().join("bad.csv");
        fs::create_dir(&bad).unwrap();

        let mut txn = manager.begin(vec![good.clone(), bad.clone()]).unwrap();
        manager
            .record_write(&mut txn, &good, "id\nmutated\n".to_string())
            .unwrap();
        manager
            .record_write(&mut txn, &bad, "id\n1\n".to_string())
            .unwrap();

        let result = manager.commit(&mut txn);
        assert!(matches!(result, Err(Error::Backup { .. })));
        assert_eq!(txn.state(), TxnState::RolledBack);
        assert_eq!(fs::read_to_string(&good).unwrap(), "id\n1\n");
        assert!(!manager.is_locked(&good));
    }

    #[test]
    fn test_rollback_of_new_resource_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let fresh = dir.path().join("fresh.csv");
        let bad = dir.path().join("bad.csv");
        fs::create_dir(&bad).unwrap();

        let mut txn = manager.begin(vec![fresh.clone(), bad.clone()]).unwrap();
        manager
            .record_write(&mut txn, &fresh, "id\n1\n".to_string())
            .unwrap();
        manager
            .record_write(&mut txn, &bad, "x".to_string())
            .unwrap();

        assert!(manager.commit(&mut txn).is_err());
        assert!(!fresh.exists());
    }

    #[test]
    fn test_overlapping_begin_fails_with_resource_locked() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let shared = dir.path().join("shared.csv");
        let other = dir.path().join("other.csv");

        let txn = manager.begin(vec![shared.clone()]).unwrap();
        let result = manager.begin(vec![other.clone(), shared.clone()]);

        match result {
            Err(Error::ResourceLocked { path, txn_id }) => {
                assert_eq!(path, shared);
                assert_eq!(txn_id, txn.id());
            }
            other => panic!("expected ResourceLocked, got {:?}", other.map(|t| t.id())),
        }
        // The failed begin acquired nothing.
        assert!(!manager.is_locked(&other));
    }

    #[test]
    fn test_disjoint_transactions_may_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");

        let mut txn_a = manager.begin(vec![a.clone()]).unwrap();
        let mut txn_b = manager.begin(vec![b.clone()]).unwrap();

        manager.record_write(&mut txn_a, &a, "id\n1\n".to_string()).unwrap();
        manager.record_write(&mut txn_b, &b, "id\n2\n".to_string()).unwrap();
        manager.commit(&mut txn_a).unwrap();
        manager.commit(&mut txn_b).unwrap();

        assert_eq!(fs::read_to_string(&a).unwrap(), "id\n1\n");
        assert_eq!(fs::read_to_string(&b).unwrap(), "id\n2\n");
    }

    #[test]
    fn test_dropped_open_transaction_releases_locks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let a = dir.path().join("a.csv");
        {
            let _txn = manager.begin(vec![a.clone()]).unwrap();
            assert!(manager.is_locked(&a));
        }
        assert!(!manager.is_locked(&a));
        assert!(manager.begin(vec![a]).is_ok());
    }

    #[test]
    fn test_write_outside_resource_set_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let a = dir.path().join("a.csv");
        let stranger = dir.path().join("stranger.csv");

        let mut txn = manager.begin(vec![a]).unwrap();
        let result = manager.record_write(&mut txn, &stranger, String::new());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_audit_brackets_transaction_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(Arc::clone(&sink) as Arc<dyn crate::audit::AuditSink>, "test");
        let manager = TransactionManager::new(BackupStore::new(dir.path().join("b"), 3), audit);

        let a = dir.path().join("a.csv");
        fs::write(&a, "id\n1\n").unwrap();

        let mut txn = manager.begin(vec![a.clone()]).unwrap();
        manager.record_write(&mut txn, &a, "id\n2\n".to_string()).unwrap();
        manager.commit(&mut txn).unwrap();

        let entries = crate::audit::parse_log(&sink.lines().join("\n"));
        let ops: Vec<&str> = entries.iter().map(|e| e.operation.token()).collect();
        assert_eq!(
            ops,
            vec![
                "BEGIN_TRANSACTION",
                "CREATE_BACKUP",
                "WRITE_FILE",
                "COMMIT_TRANSACTION"
            ]
        );
        // Every entry inside the transaction carries the same identifier.
        assert!(entries.iter().all(|e| e.txn_id == Some(txn.id())));
    }
}
