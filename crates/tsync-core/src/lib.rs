//! tsync-core: bidirectional table synchronization with transactional
//! write-safety and audit logging
//!
//! This library reconciles two parallel CSV-backed datasets describing the
//! same logical entities (a server-side and a client-side copy):
//! - Load and validate the server/client table mapping registry
//! - Compute per-key differences between the two record sets
//! - Resolve differences under a chosen direction and conflict policy
//! - Apply each table's write plan as one all-or-nothing transaction with
//!   pre-write backups and bounded backup retention
//! - Append a structured, parseable audit record for every mutation

pub mod audit;
pub mod backup;
pub mod compare;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod record;
pub mod resolve;
pub mod store;
pub mod txn;

pub use audit::{parse_log, replay, AuditEntry, AuditLogger, AuditSink, FileAuditSink, MemorySink, Operation};
pub use backup::{BackupGeneration, BackupStore};
pub use compare::{compare, DiffKind, Difference};
pub use engine::{
    CancelToken, SyncConfig, SyncEngine, SyncEvent, SyncReport, SyncResult, TablePlan,
};
pub use error::{Error, Result};
pub use mapping::{MappingRegistry, TableMapping};
pub use record::{FieldValue, Record};
pub use resolve::{resolve, ConflictPolicy, SyncDirection, WriteAction};
pub use store::{load_csv, render_csv, TableStore};
pub use txn::{Transaction, TransactionManager, TxnState};
