//! Record comparator: per-key differences between two record sets
//!
//! Left is the server side, right is the client side. Differences are
//! reported in left iteration order followed by right-only additions, so
//! results are deterministic for a fixed input ordering without assuming
//! keys are orderable.

use crate::record::Record;
use std::collections::HashMap;

/// Classification of a single per-key difference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Record exists only on the right side
    Added,
    /// Record exists only on the left side
    Removed,
    /// Record exists on both sides with differing field values
    Modified,
    /// Record exists on both sides with equal field values
    Identical,
}

/// One detected discrepancy between a left record and its right counterpart
#[derive(Debug, Clone, PartialEq)]
pub struct Difference {
    /// Matching key shared by the two candidates
    pub key: String,
    /// Classification
    pub kind: DiffKind,
    /// Left-side record, if present
    pub left: Option<Record>,
    /// Right-side record, if present
    pub right: Option<Record>,
    /// Names of fields that differ, for Modified differences
    pub changed_fields: Vec<String>,
}

impl Difference {
    /// Whether this difference requires any action at all
    pub fn is_actionable(&self) -> bool {
        self.kind != DiffKind::Identical
    }
}

/// Compare two record sets and classify every key present on either side.
///
/// Builds a key index per side in O(n). An empty input on either side is
/// legal and yields only Added/Removed differences.
pub fn compare(left: &[Record], right: &[Record]) -> Vec<Difference> {
    let right_index: HashMap<&str, &Record> =
        right.iter().map(|r| (r.key.as_str(), r)).collect();
    let left_index: HashMap<&str, &Record> =
        left.iter().map(|r| (r.key.as_str(), r)).collect();

    let mut differences = Vec::with_capacity(left.len() + right.len());

    for left_record in left {
        match right_index.get(left_record.key.as_str()) {
            Some(right_record) => {
                let changed = changed_fields(left_record, right_record);
                let kind = if changed.is_empty() {
                    DiffKind::Identical
                } else {
                    DiffKind::Modified
                };
                differences.push(Difference {
                    key: left_record.key.clone(),
                    kind,
                    left: Some(left_record.clone()),
                    right: Some((*right_record).clone()),
                    changed_fields: changed,
                });
            }
            None => differences.push(Difference {
                key: left_record.key.clone(),
                kind: DiffKind::Removed,
                left: Some(left_record.clone()),
                right: None,
                changed_fields: Vec::new(),
            }),
        }
    }

    for right_record in right {
        if !left_index.contains_key(right_record.key.as_str()) {
            differences.push(Difference {
                key: right_record.key.clone(),
                kind: DiffKind::Added,
                left: None,
                right: Some(right_record.clone()),
                changed_fields: Vec::new(),
            });
        }
    }

    differences
}

/// Names of fields whose values differ between two records.
///
/// Covers the union of both field sets; a field present on one side and
/// absent (not merely empty) on the other counts as changed.
fn changed_fields(left: &Record, right: &Record) -> Vec<String> {
    let mut changed = Vec::new();

    for (name, left_value) in &left.fields {
        match right.get(name) {
            Some(right_value) if right_value == left_value => {}
            _ => changed.push(name.clone()),
        }
    }

    for (name, _) in &right.fields {
        if left.get(name).is_none() {
            changed.push(name.clone());
        }
    }

    changed
}
