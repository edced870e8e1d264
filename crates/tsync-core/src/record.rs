//! Core record types for representing table data

use serde::{Deserialize, Serialize};

/// A scalar field value with type detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    Text(String),
    /// Empty/null field
    Empty,
}

impl FieldValue {
    /// Parse a string into a FieldValue, detecting the type
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();

        if trimmed.is_empty() {
            return FieldValue::Empty;
        }

        if let Ok(i) = trimmed.parse::<i64>() {
            return FieldValue::Integer(i);
        }

        if let Ok(f) = trimmed.parse::<f64>() {
            return FieldValue::Float(f);
        }

        FieldValue::Text(trimmed.to_string())
    }

    /// Check if the field is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }

    /// Numeric view of the value, if it has one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert to a display string
    pub fn to_string_value(&self) -> String {
        match self {
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Empty => String::new(),
        }
    }

    /// Ordering used by the timestamp conflict policy. Numeric values compare
    /// numerically; everything else compares on the string form, which sorts
    /// ISO-8601 timestamps chronologically.
    pub fn compare_as_timestamp(&self, other: &FieldValue) -> std::cmp::Ordering {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
            _ => self.to_string_value().cmp(&other.to_string_value()),
        }
    }
}

// Numeric values are compared numerically so that "1" on one side and "1.0"
// on the other do not register as a modification.
impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Empty, FieldValue::Empty) => true,
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Empty => write!(f, ""),
        }
    }
}

/// A single record: an ordered mapping from field name to value, tagged with
/// the primary key value(s) used for matching across sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Composite key string built from the key columns
    pub key: String,
    /// Field values in column order
    pub fields: Vec<(String, FieldValue)>,
}

impl Record {
    /// Create a record from ordered fields, deriving its key from `key_columns`
    pub fn new(fields: Vec<(String, FieldValue)>, key_columns: &[String]) -> Self {
        let key = composite_key(&fields, key_columns);
        Self { key, fields }
    }

    /// Get a field value by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Set a field value by name, appending the field if absent
    pub fn set(&mut self, name: &str, value: FieldValue) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Field names in column order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Build the composite key string for a set of fields.
///
/// Key column values are joined with `\u{1f}` (unit separator) so that
/// multi-column keys cannot collide with a single-column key containing
/// a joining character.
pub fn composite_key(fields: &[(String, FieldValue)], key_columns: &[String]) -> String {
    key_columns
        .iter()
        .map(|col| {
            fields
                .iter()
                .find(|(n, _)| n == col)
                .map(|(_, v)| v.to_string_value())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}
