//! Table Sync CLI
//!
//! Command-line tool for comparing and synchronizing server-side and
//! client-side game data tables.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tsync_core::{
    parse_log, replay, BackupStore, CancelToken, ConflictPolicy, DiffKind, MappingRegistry,
    SyncConfig, SyncDirection, SyncEngine, SyncEvent, WriteAction,
};

#[derive(Parser)]
#[command(name = "tsync-cli")]
#[command(about = "Server/client table synchronization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    ServerToClient,
    ClientToServer,
    Bidirectional,
}

impl From<DirectionArg> for SyncDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::ServerToClient => SyncDirection::ServerToClient,
            DirectionArg::ClientToServer => SyncDirection::ClientToServer,
            DirectionArg::Bidirectional => SyncDirection::Bidirectional,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    ServerPriority,
    ClientPriority,
    Timestamp,
    Manual,
}

impl From<PolicyArg> for ConflictPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::ServerPriority => ConflictPolicy::ServerPriority,
            PolicyArg::ClientPriority => ConflictPolicy::ClientPriority,
            PolicyArg::Timestamp => ConflictPolicy::Timestamp,
            PolicyArg::Manual => ConflictPolicy::Manual,
        }
    }
}

#[derive(Parser)]
struct DataArgs {
    /// Mapping registry file (JSON)
    #[arg(short, long)]
    mappings: PathBuf,

    /// Directory holding server-side table CSVs
    #[arg(long)]
    server_root: PathBuf,

    /// Directory holding client-side table CSVs
    #[arg(long)]
    client_root: PathBuf,

    /// Directory receiving backup generations
    #[arg(long, default_value = "backups")]
    backup_dir: PathBuf,

    /// Backup generations retained per resource
    #[arg(long, default_value_t = 5)]
    retention: usize,

    /// Audit log file
    #[arg(long, default_value = "audit.log")]
    audit_log: PathBuf,

    /// Acting user recorded in the audit log
    #[arg(long, default_value = "tsync-cli")]
    user: String,

    /// Modification-time column consulted by the timestamp policy
    #[arg(long, default_value = "modified_at")]
    timestamp_column: String,
}

impl DataArgs {
    fn engine(&self) -> tsync_core::Result<SyncEngine> {
        let registry = MappingRegistry::load(&self.mappings)?;
        let mut config = SyncConfig::new(&self.server_root, &self.client_root, &self.backup_dir);
        config.backup_retention = self.retention;
        config.user = self.user.clone();
        config.timestamp_column = self.timestamp_column.clone();
        SyncEngine::with_file_audit(registry, &config, &self.audit_log)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and list the table mapping registry
    Mappings {
        /// Mapping registry file (JSON)
        #[arg(short, long)]
        mappings: PathBuf,
    },

    /// Show the difference set and resolved plan for one table (dry run)
    Diff {
        #[command(flatten)]
        data: DataArgs,

        /// Server table name to diff
        #[arg(short, long)]
        table: String,

        /// Sync direction
        #[arg(short, long, value_enum, default_value = "bidirectional")]
        direction: DirectionArg,

        /// Conflict policy
        #[arg(short, long, value_enum, default_value = "manual")]
        policy: PolicyArg,
    },

    /// Synchronize one or more tables
    Sync {
        #[command(flatten)]
        data: DataArgs,

        /// Server table names to sync, in order. When omitted, every mapped
        /// table present under the server root is synced.
        #[arg(short, long)]
        table: Vec<String>,

        /// Sync direction
        #[arg(short, long, value_enum)]
        direction: DirectionArg,

        /// Conflict policy
        #[arg(short, long, value_enum)]
        policy: PolicyArg,
    },

    /// Replay an audit log into a transaction timeline
    Audit {
        /// Audit log file to parse
        #[arg(short, long)]
        log: PathBuf,
    },

    /// List backup generations
    Backups {
        /// Backup directory
        #[arg(short, long)]
        dir: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        if e.is_data_safety_alarm() {
            eprintln!("DATA SAFETY ALARM: some resources may be inconsistent; inspect the backup directory and audit log before retrying.");
        }
        std::process::exit(1);
    }
}

fn run() -> tsync_core::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Mappings { mappings } => cmd_mappings(&mappings),
        Commands::Diff {
            data,
            table,
            direction,
            policy,
        } => cmd_diff(&data, &table, direction.into(), policy.into()),
        Commands::Sync {
            data,
            table,
            direction,
            policy,
        } => cmd_sync(&data, &table, direction.into(), policy.into()),
        Commands::Audit { log } => cmd_audit(&log),
        Commands::Backups { dir } => cmd_backups(&dir),
    }
}

fn cmd_mappings(path: &PathBuf) -> tsync_core::Result<()> {
    let registry = MappingRegistry::load(path)?;

    println!("Mappings ({}):", registry.len());
    for mapping in registry.mappings() {
        let keys = if mapping.key_columns.is_empty() {
            "<first column>".to_string()
        } else {
            mapping.key_columns.join(", ")
        };
        println!(
            "  {} <-> {} (keys: {})",
            mapping.server_table, mapping.client_table, keys
        );
    }

    Ok(())
}

fn cmd_diff(
    data: &DataArgs,
    table: &str,
    direction: SyncDirection,
    policy: ConflictPolicy,
) -> tsync_core::Result<()> {
    let engine = data.engine()?;
    let plan = engine.plan_table(table, direction, policy)?;

    println!(
        "Table {} <-> {}: {} record(s) compared",
        plan.mapping.server_table,
        plan.mapping.client_table,
        plan.differences.len()
    );
    println!();

    for (diff, (key, action)) in plan.differences.iter().zip(&plan.actions) {
        let kind = match diff.kind {
            DiffKind::Added => "client-only",
            DiffKind::Removed => "server-only",
            DiffKind::Modified => "modified",
            DiffKind::Identical => continue,
        };
        let action = match action {
            WriteAction::WriteLeftToRight => "server -> client",
            WriteAction::WriteRightToLeft => "client -> server",
            WriteAction::Skip => "skip",
            WriteAction::DeferToManual => "MANUAL CONFLICT",
        };
        let fields = if diff.changed_fields.is_empty() {
            String::new()
        } else {
            format!(" [{}]", diff.changed_fields.join(", "))
        };
        println!("  key {}: {}{} => {}", key, kind, fields, action);
    }

    if !plan.errors.is_empty() {
        println!();
        println!("Policy errors ({}):", plan.errors.len());
        for error in &plan.errors {
            println!("  {}", error);
        }
    }

    Ok(())
}

fn cmd_sync(
    data: &DataArgs,
    tables: &[String],
    direction: SyncDirection,
    policy: ConflictPolicy,
) -> tsync_core::Result<()> {
    let engine = data.engine()?;

    let tables = if tables.is_empty() {
        engine.known_tables()?
    } else {
        tables.to_vec()
    };
    if tables.is_empty() {
        println!("No mapped tables found under the server root.");
        return Ok(());
    }

    let (handle, events) = engine.spawn(tables, direction, policy, CancelToken::new());

    for event in events {
        match event {
            SyncEvent::TableStarted { table, index, total } => {
                println!("[{}/{}] syncing {}...", index + 1, total, table);
            }
            SyncEvent::TableFinished { table, result } => {
                let status = if result.cancelled {
                    "cancelled"
                } else if result.success {
                    "ok"
                } else {
                    "FAILED"
                };
                println!(
                    "[{}] {}: {} total, {} synced, {} skipped, {} conflicts",
                    status,
                    table,
                    result.total_records,
                    result.synced_records,
                    result.skipped_records,
                    result.conflict_records
                );
                for error in &result.errors {
                    println!("    error: {}", error);
                }
            }
            SyncEvent::Finished { .. } => {}
        }
    }

    let report = handle
        .join()
        .map_err(|_| tsync_core::Error::Configuration("sync worker panicked".to_string()))?;

    println!();
    let failed = report.results.iter().filter(|r| !r.success).count();
    println!(
        "Sync complete: {} table(s), {} failed",
        report.results.len(),
        failed
    );

    for alarm in &report.alarms {
        eprintln!("DATA SAFETY ALARM: {}", alarm);
    }
    if !report.alarms.is_empty() {
        std::process::exit(2);
    }

    Ok(())
}

fn cmd_audit(log: &PathBuf) -> tsync_core::Result<()> {
    let content = std::fs::read_to_string(log)?;
    let replayed = replay(parse_log(&content));

    println!("Transactions ({}):", replayed.transactions.len());
    for txn in &replayed.transactions {
        let status = if txn.committed() { "committed" } else { "rolled back" };
        println!("  {} ({}, {} entries)", txn.txn_id, status, txn.entries.len());
        for entry in &txn.entries {
            let file = entry
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    {} {} {} success={}",
                entry.timestamp,
                entry.operation.token(),
                file,
                entry.success
            );
        }
    }

    if !replayed.unassociated.is_empty() {
        println!();
        println!("Entries outside transactions: {}", replayed.unassociated.len());
    }

    Ok(())
}

fn cmd_backups(dir: &PathBuf) -> tsync_core::Result<()> {
    let store = BackupStore::new(dir, usize::MAX);

    let resources = store.resources()?;
    if resources.is_empty() {
        println!("No backup generations in {}", dir.display());
        return Ok(());
    }

    println!("Backed-up resources ({}):", resources.len());
    for resource in resources {
        println!("  {}", resource);
    }

    Ok(())
}
