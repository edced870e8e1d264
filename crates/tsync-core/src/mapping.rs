//! Table mapping registry: server-side to client-side table correspondence
//!
//! Mappings are loaded once from a JSON registry file and treated as
//! read-only for the lifetime of a sync run.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// A declared correspondence between a server table and a client table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    /// Server-side table name
    pub server_table: String,
    /// Client-side table name
    pub client_table: String,
    /// Key columns used to match records across sides.
    /// When empty, the first column of the loaded table is used.
    #[serde(default)]
    pub key_columns: Vec<String>,
}

/// The full set of mappings for a deployment, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRegistry {
    mappings: Vec<TableMapping>,
}

impl MappingRegistry {
    /// Load and validate a mapping registry from a JSON file.
    ///
    /// Rejects a registry that names the same table more than once on the
    /// same side; duplicate mappings are ambiguous, not silently merged.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "failed to read mapping registry '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mappings: Vec<TableMapping> = serde_json::from_str(&content).map_err(|e| {
            Error::Configuration(format!(
                "malformed mapping registry '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_mappings(mappings)
    }

    /// Build a registry from in-memory mappings, applying the same validation
    /// as `load`
    pub fn from_mappings(mappings: Vec<TableMapping>) -> Result<Self> {
        let mut server_seen = HashSet::new();
        let mut client_seen = HashSet::new();

        for mapping in &mappings {
            if !server_seen.insert(mapping.server_table.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate server table '{}' in mapping registry",
                    mapping.server_table
                )));
            }
            if !client_seen.insert(mapping.client_table.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate client table '{}' in mapping registry",
                    mapping.client_table
                )));
            }
        }

        Ok(Self { mappings })
    }

    /// Find a mapping by its server table name
    pub fn find(&self, server_table: &str) -> Option<&TableMapping> {
        self.mappings
            .iter()
            .find(|m| m.server_table == server_table)
    }

    /// All mappings, in registry order
    pub fn mappings(&self) -> &[TableMapping] {
        &self.mappings
    }

    /// Number of mappings in the registry
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
