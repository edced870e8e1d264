//! Sync orchestrator: drives the full pipeline and reports progress
//!
//! Tables are processed sequentially in caller order; each table's writes
//! are one all-or-nothing transaction. Progress is emitted as events on a
//! channel so the caller's thread (UI or otherwise) is never blocked: use
//! `spawn` to run a sync on a dedicated worker and drain the receiver.

use crate::audit::{AuditLogger, FileAuditSink, Operation};
use crate::backup::BackupStore;
use crate::compare::{compare, Difference};
use crate::error::{Error, Result};
use crate::mapping::{MappingRegistry, TableMapping};
use crate::record::Record;
use crate::resolve::{resolve, ConflictPolicy, SyncDirection, WriteAction};
use crate::store::{render_csv, TableStore};
use crate::txn::TransactionManager;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// Configuration for a sync deployment
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding the server-side table files
    pub server_root: PathBuf,
    /// Directory holding the client-side table files
    pub client_root: PathBuf,
    /// Directory receiving backup generations
    pub backup_dir: PathBuf,
    /// Backup generations retained per resource
    pub backup_retention: usize,
    /// Acting user stamped on audit entries
    pub user: String,
    /// Modification-time field consulted by the timestamp policy
    pub timestamp_column: String,
}

impl SyncConfig {
    /// Configuration with default retention, user, and timestamp column
    pub fn new(
        server_root: impl Into<PathBuf>,
        client_root: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_root: server_root.into(),
            client_root: client_root.into(),
            backup_dir: backup_dir.into(),
            backup_retention: 5,
            user: "tablesync".to_string(),
            timestamp_column: "modified_at".to_string(),
        }
    }
}

/// Cooperative cancellation flag, checked between tables and between
/// planned actions within a table
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the run holding this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-table outcome of a sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    /// Server table name the caller requested
    pub table: String,
    pub success: bool,
    /// The table was interrupted by cooperative cancellation, not a failure
    pub cancelled: bool,
    /// Records examined (union of keys on both sides)
    pub total_records: usize,
    /// Records actually written
    pub synced_records: usize,
    /// Actionable differences skipped by direction or policy
    pub skipped_records: usize,
    /// Conflicts deferred to manual resolution
    pub conflict_records: usize,
    /// Error messages, in occurrence order
    pub errors: Vec<String>,
    /// Rollback could not fully restore this table's resources
    pub data_safety_alarm: bool,
}

impl SyncResult {
    fn empty(table: &str) -> Self {
        Self {
            table: table.to_string(),
            success: true,
            cancelled: false,
            total_records: 0,
            synced_records: 0,
            skipped_records: 0,
            conflict_records: 0,
            errors: Vec::new(),
            data_safety_alarm: false,
        }
    }

    fn failed(table: &str, error: &Error) -> Self {
        Self {
            success: false,
            errors: vec![error.to_string()],
            data_safety_alarm: error.is_data_safety_alarm(),
            ..Self::empty(table)
        }
    }
}

/// Progress events emitted while a run executes
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Emitted before each table starts
    TableStarted {
        table: String,
        index: usize,
        total: usize,
    },
    /// Emitted after each table finishes, success or failure
    TableFinished { table: String, result: SyncResult },
    /// Emitted once after the full sequence
    Finished { results: Vec<SyncResult> },
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Results for every table that was started, in caller order
    pub results: Vec<SyncResult>,
    /// The run was cut short by cancellation
    pub cancelled: bool,
    /// Data-safety alarms; non-empty means some resource may be in neither
    /// its old nor its new state and needs operator attention
    pub alarms: Vec<String>,
}

/// Dry-run plan for a single table
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub mapping: TableMapping,
    pub differences: Vec<Difference>,
    /// Resolved action per difference, in comparator order
    pub actions: Vec<(String, WriteAction)>,
    /// Policy errors encountered while resolving
    pub errors: Vec<String>,
}

/// The bidirectional table synchronization engine
#[derive(Clone)]
pub struct SyncEngine {
    registry: MappingRegistry,
    server: TableStore,
    client: TableStore,
    txn_manager: TransactionManager,
    audit: AuditLogger,
    timestamp_column: String,
}

impl SyncEngine {
    /// Build an engine from a validated registry and an injected audit logger
    pub fn new(registry: MappingRegistry, config: &SyncConfig, audit: AuditLogger) -> Self {
        let backups = BackupStore::new(&config.backup_dir, config.backup_retention);
        let txn_manager = TransactionManager::new(backups, audit.clone());
        Self {
            registry,
            server: TableStore::new(&config.server_root),
            client: TableStore::new(&config.client_root),
            txn_manager,
            audit,
            timestamp_column: config.timestamp_column.clone(),
        }
    }

    /// Convenience constructor appending audit entries to a log file
    pub fn with_file_audit(
        registry: MappingRegistry,
        config: &SyncConfig,
        audit_log: impl Into<PathBuf>,
    ) -> Result<Self> {
        let sink = FileAuditSink::open(audit_log.into())?;
        let audit = AuditLogger::new(Arc::new(sink), config.user.clone());
        Ok(Self::new(registry, config, audit))
    }

    /// The mapping registry this engine was built with
    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    /// The transaction manager (exposed for backup inspection)
    pub fn txn_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }

    /// Mapped server tables whose files exist under the server root, in
    /// registry order. Unmapped stray files are ignored.
    pub fn known_tables(&self) -> Result<Vec<String>> {
        let present = self.server.list_tables()?;
        Ok(self
            .registry
            .mappings()
            .iter()
            .map(|m| m.server_table.clone())
            .filter(|t| present.iter().any(|p| p == t))
            .collect())
    }

    /// Run a sync synchronously on the calling thread.
    ///
    /// Prefer `spawn` from interactive callers.
    pub fn sync_tables(
        &self,
        tables: &[String],
        direction: SyncDirection,
        policy: ConflictPolicy,
        cancel: &CancelToken,
    ) -> SyncReport {
        self.run(tables, direction, policy, cancel, None)
    }

    /// Run a sync on a dedicated worker thread, reporting progress through
    /// the returned event channel
    pub fn spawn(
        &self,
        tables: Vec<String>,
        direction: SyncDirection,
        policy: ConflictPolicy,
        cancel: CancelToken,
    ) -> (thread::JoinHandle<SyncReport>, Receiver<SyncEvent>) {
        let engine = self.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            engine.run(&tables, direction, policy, &cancel, Some(&tx))
        });
        (handle, rx)
    }

    fn run(
        &self,
        tables: &[String],
        direction: SyncDirection,
        policy: ConflictPolicy,
        cancel: &CancelToken,
        events: Option<&Sender<SyncEvent>>,
    ) -> SyncReport {
        let mut report = SyncReport {
            results: Vec::with_capacity(tables.len()),
            cancelled: false,
            alarms: Vec::new(),
        };

        for (index, table) in tables.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            emit(
                events,
                SyncEvent::TableStarted {
                    table: table.clone(),
                    index,
                    total: tables.len(),
                },
            );
            tracing::info!(table = %table, index, total = tables.len(), "syncing table");

            let result = self.sync_one_table(table, direction, policy, cancel);

            if result.cancelled {
                report.cancelled = true;
            }
            if result.data_safety_alarm {
                report
                    .alarms
                    .extend(result.errors.iter().cloned());
            }

            emit(
                events,
                SyncEvent::TableFinished {
                    table: table.clone(),
                    result: result.clone(),
                },
            );

            let stop = result.cancelled || result.data_safety_alarm;
            report.results.push(result);
            if stop {
                break;
            }
        }

        emit(
            events,
            SyncEvent::Finished {
                results: report.results.clone(),
            },
        );
        report
    }

    /// Compute the difference set and resolved plan for one table without
    /// touching any data
    pub fn plan_table(
        &self,
        table: &str,
        direction: SyncDirection,
        policy: ConflictPolicy,
    ) -> Result<TablePlan> {
        let mapping = self
            .registry
            .find(table)
            .ok_or_else(|| Error::MappingNotFound(table.to_string()))?
            .clone();

        let left = self.load_side(&self.server, &mapping.server_table, &mapping.key_columns)?;
        let right = self.load_side(&self.client, &mapping.client_table, &mapping.key_columns)?;

        let differences = compare(&left, &right);
        let mut actions = Vec::with_capacity(differences.len());
        let mut errors = Vec::new();

        for diff in &differences {
            match resolve(diff, direction, policy, &self.timestamp_column) {
                Ok(action) => actions.push((diff.key.clone(), action)),
                Err(e) => {
                    actions.push((diff.key.clone(), WriteAction::Skip));
                    errors.push(e.to_string());
                }
            }
        }

        Ok(TablePlan {
            mapping,
            differences,
            actions,
            errors,
        })
    }

    fn sync_one_table(
        &self,
        table: &str,
        direction: SyncDirection,
        policy: ConflictPolicy,
        cancel: &CancelToken,
    ) -> SyncResult {
        let result = self.sync_one_table_inner(table, direction, policy, cancel);

        // Every error, recovered or not, leaves a trace in the audit log.
        if !result.success || !result.errors.is_empty() {
            let mut entry = self
                .audit
                .entry(Operation::Other("SYNC_TABLE".to_string()))
                .with_success(result.success);
            if !result.errors.is_empty() {
                entry = entry.with_detail(result.errors.join("; "));
            }
            if let Some(mapping) = self.registry.find(table) {
                entry = entry.with_file(self.server.table_path(&mapping.server_table));
            }
            self.audit.record(entry);
        }

        result
    }

    fn sync_one_table_inner(
        &self,
        table: &str,
        direction: SyncDirection,
        policy: ConflictPolicy,
        cancel: &CancelToken,
    ) -> SyncResult {
        let mapping = match self.registry.find(table) {
            Some(m) => m.clone(),
            None => return SyncResult::failed(table, &Error::MappingNotFound(table.to_string())),
        };

        let left =
            match self.load_side(&self.server, &mapping.server_table, &mapping.key_columns) {
                Ok(records) => records,
                Err(e) => return SyncResult::failed(table, &e),
            };
        let right =
            match self.load_side(&self.client, &mapping.client_table, &mapping.key_columns) {
                Ok(records) => records,
                Err(e) => return SyncResult::failed(table, &e),
            };

        let differences = compare(&left, &right);

        let mut result = SyncResult::empty(table);
        result.total_records = differences.len();

        let mut new_left = left;
        let mut new_right = right;
        let mut left_changed = false;
        let mut right_changed = false;
        let mut planned = 0usize;

        for diff in &differences {
            if cancel.is_cancelled() {
                result.cancelled = true;
                result.success = false;
                return result;
            }

            let action = match resolve(diff, direction, policy, &self.timestamp_column) {
                Ok(action) => action,
                Err(e) => {
                    // A policy failure fails the single difference, not the
                    // table; the remaining actions are still attempted.
                    result.errors.push(e.to_string());
                    result.skipped_records += 1;
                    continue;
                }
            };

            match action {
                WriteAction::WriteLeftToRight => {
                    if let Some(record) = &diff.left {
                        upsert(&mut new_right, record.clone());
                        right_changed = true;
                        planned += 1;
                    }
                }
                WriteAction::WriteRightToLeft => {
                    if let Some(record) = &diff.right {
                        upsert(&mut new_left, record.clone());
                        left_changed = true;
                        planned += 1;
                    }
                }
                WriteAction::Skip => {
                    if diff.is_actionable() {
                        result.skipped_records += 1;
                    }
                }
                WriteAction::DeferToManual => {
                    result.conflict_records += 1;
                }
            }
        }

        if !left_changed && !right_changed {
            // Nothing to write; manual deferral and no-op syncs are not
            // failures.
            return result;
        }

        let mut resources = Vec::new();
        if left_changed {
            resources.push(self.server.table_path(&mapping.server_table));
        }
        if right_changed {
            resources.push(self.client.table_path(&mapping.client_table));
        }

        let mut txn = match self.txn_manager.begin(resources) {
            Ok(txn) => txn,
            Err(e) => {
                let mut failed = SyncResult::failed(table, &e);
                failed.total_records = result.total_records;
                failed.skipped_records = result.skipped_records;
                failed.conflict_records = result.conflict_records;
                failed.errors = [result.errors, failed.errors].concat();
                return failed;
            }
        };

        let write_result = (|| -> Result<()> {
            if left_changed {
                let path = self.server.table_path(&mapping.server_table);
                self.txn_manager
                    .record_write(&mut txn, &path, render_csv(&new_left))?;
            }
            if right_changed {
                let path = self.client.table_path(&mapping.client_table);
                self.txn_manager
                    .record_write(&mut txn, &path, render_csv(&new_right))?;
            }
            self.txn_manager.commit(&mut txn)
        })();

        match write_result {
            Ok(()) => {
                result.synced_records = planned;
                result
            }
            Err(e) => {
                // All-or-nothing at table granularity: a failed commit
                // reports zero synced records.
                result.success = false;
                result.synced_records = 0;
                result.data_safety_alarm = e.is_data_safety_alarm();
                result.errors.push(e.to_string());
                result
            }
        }
    }

    fn load_side(
        &self,
        store: &TableStore,
        table: &str,
        key_columns: &[String],
    ) -> Result<Vec<Record>> {
        let path = store.table_path(table);
        match store.load_table(table, key_columns) {
            Ok(records) => {
                self.audit
                    .record(self.audit.entry(Operation::ReadFile).with_file(&path));
                Ok(records)
            }
            Err(e) => {
                self.audit.record(
                    self.audit
                        .entry(Operation::ReadFile)
                        .with_file(&path)
                        .with_success(false)
                        .with_detail(e.to_string()),
                );
                Err(e)
            }
        }
    }
}

fn upsert(records: &mut Vec<Record>, record: Record) {
    match records.iter_mut().find(|r| r.key == record.key) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

fn emit(events: Option<&Sender<SyncEvent>>, event: SyncEvent) {
    if let Some(tx) = events {
        // A dropped receiver must not abort the run.
        let _ = tx.send(event);
    }
}
