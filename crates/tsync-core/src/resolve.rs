//! Conflict resolver: decides, per difference, which side wins
//!
//! This is a pure decision table with no I/O. Left is the server side,
//! right is the client side; `WriteLeftToRight` propagates the server
//! value to the client.

use crate::compare::{DiffKind, Difference};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which direction(s) a sync run is allowed to write in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Server is authoritative; only the client side is written
    ServerToClient,
    /// Client is authoritative; only the server side is written
    ClientToServer,
    /// Both directions are evaluated; modified records need a policy
    Bidirectional,
}

impl SyncDirection {
    fn allows(&self, action: WriteAction) -> bool {
        match action {
            WriteAction::WriteLeftToRight => {
                matches!(self, SyncDirection::ServerToClient | SyncDirection::Bidirectional)
            }
            WriteAction::WriteRightToLeft => {
                matches!(self, SyncDirection::ClientToServer | SyncDirection::Bidirectional)
            }
            WriteAction::Skip | WriteAction::DeferToManual => true,
        }
    }
}

/// How a modified record's winning side is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// The server value wins unconditionally
    ServerPriority,
    /// The client value wins unconditionally
    ClientPriority,
    /// The most recently modified record wins, judged by a designated
    /// modification-time field
    Timestamp,
    /// Resolution is deferred to the caller; conflicts are reported,
    /// never applied
    Manual,
}

/// Concrete action for one difference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Write the server record to the client side
    WriteLeftToRight,
    /// Write the client record to the server side
    WriteRightToLeft,
    /// Nothing to do, or the direction excludes the implied write
    Skip,
    /// Conflict reported for manual resolution
    DeferToManual,
}

/// Resolve one difference into a concrete action.
///
/// `timestamp_column` names the modification-time field consulted by the
/// `Timestamp` policy; it fails with a policy error when the field is
/// absent on either record.
pub fn resolve(
    difference: &Difference,
    direction: SyncDirection,
    policy: ConflictPolicy,
    timestamp_column: &str,
) -> Result<WriteAction> {
    let candidate = match difference.kind {
        DiffKind::Identical => WriteAction::Skip,
        // The side missing the record is the write target.
        DiffKind::Removed => WriteAction::WriteLeftToRight,
        DiffKind::Added => WriteAction::WriteRightToLeft,
        DiffKind::Modified => match policy {
            ConflictPolicy::ServerPriority => WriteAction::WriteLeftToRight,
            ConflictPolicy::ClientPriority => WriteAction::WriteRightToLeft,
            ConflictPolicy::Manual => WriteAction::DeferToManual,
            ConflictPolicy::Timestamp => timestamp_winner(difference, timestamp_column)?,
        },
    };

    if direction.allows(candidate) {
        Ok(candidate)
    } else {
        Ok(WriteAction::Skip)
    }
}

fn timestamp_winner(difference: &Difference, timestamp_column: &str) -> Result<WriteAction> {
    // An empty field is as useless as a missing one for deciding recency.
    let left = difference
        .left
        .as_ref()
        .and_then(|r| r.get(timestamp_column))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Policy {
            key: difference.key.clone(),
            message: format!("server record has no '{}' field", timestamp_column),
        })?;
    let right = difference
        .right
        .as_ref()
        .and_then(|r| r.get(timestamp_column))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Policy {
            key: difference.key.clone(),
            message: format!("client record has no '{}' field", timestamp_column),
        })?;

    // Equal timestamps with differing fields: server wins, so repeated runs
    // converge instead of flip-flopping.
    Ok(match left.compare_as_timestamp(right) {
        std::cmp::Ordering::Less => WriteAction::WriteRightToLeft,
        _ => WriteAction::WriteLeftToRight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, Record};

    fn record_with_ts(id: i64, name: &str, ts: i64) -> Record {
        Record::new(
            vec![
                ("id".to_string(), FieldValue::Integer(id)),
                ("name".to_string(), FieldValue::Text(name.to_string())),
                ("modified_at".to_string(), FieldValue::Integer(ts)),
            ],
            &["id".to_string()],
        )
    }

    fn modified(left: Record, right: Record) -> Difference {
        Difference {
            key: left.key.clone(),
            kind: DiffKind::Modified,
            left: Some(left),
            right: Some(right),
            changed_fields: vec!["name".to_string()],
        }
    }

    fn left_only(record: Record) -> Difference {
        Difference {
            key: record.key.clone(),
            kind: DiffKind::Removed,
            left: Some(record),
            right: None,
            changed_fields: Vec::new(),
        }
    }

    fn right_only(record: Record) -> Difference {
        Difference {
            key: record.key.clone(),
            kind: DiffKind::Added,
            left: None,
            right: Some(record),
            changed_fields: Vec::new(),
        }
    }

    #[test]
    fn test_server_priority_always_writes_server_value_to_client() {
        let diff = modified(record_with_ts(1, "Sword", 10), record_with_ts(1, "Blade", 20));

        for direction in [SyncDirection::ServerToClient, SyncDirection::Bidirectional] {
            let action = resolve(&diff, direction, ConflictPolicy::ServerPriority, "modified_at")
                .unwrap();
            assert_eq!(action, WriteAction::WriteLeftToRight);
        }
    }

    #[test]
    fn test_client_priority_writes_client_value_to_server() {
        let diff = modified(record_with_ts(1, "Sword", 10), record_with_ts(1, "Blade", 20));
        let action = resolve(
            &diff,
            SyncDirection::Bidirectional,
            ConflictPolicy::ClientPriority,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::WriteRightToLeft);
    }

    #[test]
    fn test_direction_excluding_implied_write_skips() {
        // Client-only record under ServerToClient: server is never written.
        let diff = right_only(record_with_ts(7, "ClientOnly", 1));
        let action = resolve(
            &diff,
            SyncDirection::ServerToClient,
            ConflictPolicy::ServerPriority,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::Skip);

        // Modified record whose winner is the client, under ServerToClient.
        let diff = modified(record_with_ts(1, "a", 1), record_with_ts(1, "b", 2));
        let action = resolve(
            &diff,
            SyncDirection::ServerToClient,
            ConflictPolicy::ClientPriority,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::Skip);
    }

    #[test]
    fn test_one_sided_differences_resolve_from_direction_alone() {
        let removed = left_only(record_with_ts(1, "a", 1));
        let added = right_only(record_with_ts(2, "b", 1));

        let action = resolve(
            &removed,
            SyncDirection::Bidirectional,
            ConflictPolicy::Manual,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::WriteLeftToRight);

        let action = resolve(
            &added,
            SyncDirection::Bidirectional,
            ConflictPolicy::Manual,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::WriteRightToLeft);
    }

    #[test]
    fn test_timestamp_policy_picks_newer_record() {
        let diff = modified(record_with_ts(1, "old", 100), record_with_ts(1, "new", 200));
        let action = resolve(
            &diff,
            SyncDirection::Bidirectional,
            ConflictPolicy::Timestamp,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::WriteRightToLeft);

        let diff = modified(record_with_ts(1, "new", 300), record_with_ts(1, "old", 200));
        let action = resolve(
            &diff,
            SyncDirection::Bidirectional,
            ConflictPolicy::Timestamp,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::WriteLeftToRight);
    }

    #[test]
    fn test_timestamp_policy_missing_field_is_policy_error() {
        let left = Record::new(
            vec![("id".to_string(), FieldValue::Integer(1))],
            &["id".to_string()],
        );
        let diff = modified(left, record_with_ts(1, "b", 2));

        let result = resolve(
            &diff,
            SyncDirection::Bidirectional,
            ConflictPolicy::Timestamp,
            "modified_at",
        );
        assert!(matches!(result, Err(Error::Policy { .. })));
    }

    #[test]
    fn test_manual_policy_defers_modified_conflicts() {
        let diff = modified(record_with_ts(1, "a", 1), record_with_ts(1, "b", 2));
        let action = resolve(
            &diff,
            SyncDirection::Bidirectional,
            ConflictPolicy::Manual,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::DeferToManual);
    }

    #[test]
    fn test_identical_difference_skips() {
        let rec = record_with_ts(1, "same", 1);
        let diff = Difference {
            key: rec.key.clone(),
            kind: DiffKind::Identical,
            left: Some(rec.clone()),
            right: Some(rec),
            changed_fields: Vec::new(),
        };
        let action = resolve(
            &diff,
            SyncDirection::Bidirectional,
            ConflictPolicy::ServerPriority,
            "modified_at",
        )
        .unwrap();
        assert_eq!(action, WriteAction::Skip);
    }
}
