//! Append-only audit logging
//!
//! Every mutating and transactional operation produces one line; the log is
//! the durable ground truth for "what happened", independently replayable
//! into a timeline of transactions.
//!
//! Line format (one entry per line, fields separated by ` | `):
//!
//! ```text
//! [yyyy-MM-dd HH:mm:ss] OPERATION | User: <user> | File: <path-or-null> | Success: <true|false> | TxnId: <uuid-or-null>
//! ```
//!
//! An entry carrying free-text detail appends one extra ` | Detail: <text>`
//! segment. Parsers treat an unrecognized operation token as an opaque
//! string and skip lines whose timestamp does not parse.

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Operation kind of an audit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ReadFile,
    WriteFile,
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
    CreateBackup,
    RestoreBackup,
    /// Unrecognized token, passed through opaquely
    Other(String),
}

impl Operation {
    /// Wire token for this operation
    pub fn token(&self) -> &str {
        match self {
            Operation::ReadFile => "READ_FILE",
            Operation::WriteFile => "WRITE_FILE",
            Operation::BeginTransaction => "BEGIN_TRANSACTION",
            Operation::CommitTransaction => "COMMIT_TRANSACTION",
            Operation::RollbackTransaction => "ROLLBACK_TRANSACTION",
            Operation::CreateBackup => "CREATE_BACKUP",
            Operation::RestoreBackup => "RESTORE_BACKUP",
            Operation::Other(token) => token,
        }
    }

    /// Parse a wire token; unknown tokens become `Other`
    pub fn from_token(token: &str) -> Self {
        match token {
            "READ_FILE" => Operation::ReadFile,
            "WRITE_FILE" => Operation::WriteFile,
            "BEGIN_TRANSACTION" => Operation::BeginTransaction,
            "COMMIT_TRANSACTION" => Operation::CommitTransaction,
            "ROLLBACK_TRANSACTION" => Operation::RollbackTransaction,
            "CREATE_BACKUP" => Operation::CreateBackup,
            "RESTORE_BACKUP" => Operation::RestoreBackup,
            other => Operation::Other(other.to_string()),
        }
    }
}

/// One append-only audit record; never mutated or deleted after writing
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: NaiveDateTime,
    pub operation: Operation,
    pub user: String,
    pub file: Option<PathBuf>,
    pub success: bool,
    pub txn_id: Option<Uuid>,
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Create an entry stamped with the current UTC time
    pub fn now(operation: Operation, user: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().naive_utc(),
            operation,
            user: user.into(),
            file: None,
            success: true,
            txn_id: None,
            detail: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_txn(mut self, txn_id: Uuid) -> Self {
        self.txn_id = Some(txn_id);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Render the entry as one log line (without trailing newline)
    pub fn to_line(&self) -> String {
        let file = self
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "null".to_string());
        let txn = self
            .txn_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "null".to_string());

        let mut line = format!(
            "[{}] {} | User: {} | File: {} | Success: {} | TxnId: {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.operation.token(),
            self.user,
            file,
            self.success,
            txn
        );
        if let Some(detail) = &self.detail {
            line.push_str(" | Detail: ");
            line.push_str(detail);
        }
        line
    }

    /// Parse one log line. Returns `None` for lines that should be skipped:
    /// missing or unparseable timestamp, truncated field list, or a
    /// malformed success flag.
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (stamp, rest) = rest.split_once("] ")?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

        let mut parts = rest.split(" | ");
        let operation = Operation::from_token(parts.next()?);
        let user = parts.next()?.strip_prefix("User: ")?.to_string();
        let file = match parts.next()?.strip_prefix("File: ")? {
            "null" => None,
            path => Some(PathBuf::from(path)),
        };
        let success = parts.next()?.strip_prefix("Success: ")?.parse().ok()?;
        let txn_id = match parts.next()?.strip_prefix("TxnId: ")? {
            "null" => None,
            raw => Some(Uuid::parse_str(raw).ok()?),
        };
        // The detail is free text and may itself contain the separator, so
        // everything after the prefix belongs to it.
        let detail = parts
            .next()
            .and_then(|p| p.strip_prefix("Detail: "))
            .map(|first| {
                let mut detail = first.to_string();
                for part in parts {
                    detail.push_str(" | ");
                    detail.push_str(part);
                }
                detail
            });

        Some(Self {
            timestamp,
            operation,
            user,
            file,
            success,
            txn_id,
            detail,
        })
    }
}

/// Parse a whole log, skipping malformed lines rather than aborting
pub fn parse_log(content: &str) -> Vec<AuditEntry> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(AuditEntry::parse_line)
        .collect()
}

/// One transaction's bracketed slice of the log
#[derive(Debug, Clone, PartialEq)]
pub struct TxnTimeline {
    pub txn_id: Uuid,
    pub entries: Vec<AuditEntry>,
}

impl TxnTimeline {
    /// Whether the transaction reached a commit entry
    pub fn committed(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.operation == Operation::CommitTransaction && e.success)
    }
}

/// Replay of a full log into per-transaction timelines
#[derive(Debug, Clone, Default)]
pub struct LogReplay {
    /// Transactions in order of first appearance
    pub transactions: Vec<TxnTimeline>,
    /// Entries carrying no transaction identifier
    pub unassociated: Vec<AuditEntry>,
}

/// Group parsed entries into a transaction timeline, preserving log order
pub fn replay(entries: Vec<AuditEntry>) -> LogReplay {
    let mut replay = LogReplay::default();

    for entry in entries {
        match entry.txn_id {
            Some(txn_id) => {
                match replay
                    .transactions
                    .iter_mut()
                    .find(|t| t.txn_id == txn_id)
                {
                    Some(timeline) => timeline.entries.push(entry),
                    None => replay.transactions.push(TxnTimeline {
                        txn_id,
                        entries: vec![entry],
                    }),
                }
            }
            None => replay.unassociated.push(entry),
        }
    }

    replay
}

/// Destination for audit lines. Appends must be atomic at line granularity.
pub trait AuditSink: Send + Sync {
    fn append(&self, line: &str) -> std::io::Result<()>;
}

/// Sink appending to a flat log file
pub struct FileAuditSink {
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Open (or create) the log file for appending
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, line: &str) -> std::io::Result<()> {
        // The lock serializes concurrent appends so lines never interleave.
        let mut file = self.file.lock();
        writeln!(file, "{}", line)?;
        file.flush()
    }
}

/// In-memory sink for tests and diagnostics
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines appended so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl AuditSink for MemorySink {
    fn append(&self, line: &str) -> std::io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

/// Audit logger: records entries, never raising to the caller.
///
/// A logging failure must not abort a data operation already in flight, so
/// sink errors go to the tracing fallback channel instead of propagating.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    user: String,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>, user: impl Into<String>) -> Self {
        Self {
            sink,
            user: user.into(),
        }
    }

    /// Acting user stamped on entries created through this logger
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Create an entry pre-stamped with this logger's user
    pub fn entry(&self, operation: Operation) -> AuditEntry {
        AuditEntry::now(operation, self.user.clone())
    }

    /// Append one entry. Never propagates a failure.
    pub fn record(&self, entry: AuditEntry) {
        let line = entry.to_line();
        if let Err(e) = self.sink.append(&line) {
            tracing::warn!(error = %e, "audit append failed, entry dropped: {}", line);
        }
    }
}
