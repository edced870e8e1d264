//! CSV-backed table storage for one side of a sync (server or client)
//!
//! Each side is a directory containing one CSV file per table, named
//! `<table>.csv`, with a header row of column names.

use crate::error::{Error, Result};
use crate::record::{composite_key, FieldValue, Record};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Table storage rooted at a directory
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    /// Create a store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the CSV file backing `table`
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.csv", table))
    }

    /// Load all records of `table`, keyed by `key_columns`.
    ///
    /// When `key_columns` is empty the first column is used as the key.
    /// A missing table file is legal and yields an empty record set, so a
    /// one-sided sync can populate a side from scratch.
    pub fn load_table(&self, table: &str, key_columns: &[String]) -> Result<Vec<Record>> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(Vec::new());
        }
        load_csv(&path, key_columns)
    }

    /// List the table names present under the root, sorted
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables = Vec::new();

        for entry in WalkDir::new(&self.root).max_depth(1) {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    tables.push(stem.to_string());
                }
            }
        }

        tables.sort();
        Ok(tables)
    }
}

/// Parse a CSV file into records
pub fn load_csv(path: &Path, key_columns: &[String]) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let reader = BufReader::new(file);
    parse_csv_reader(reader, path, key_columns)
}

/// Parse CSV from a string (useful for testing)
pub fn load_csv_str(content: &str, source_name: &str, key_columns: &[String]) -> Result<Vec<Record>> {
    parse_csv_reader(
        content.as_bytes(),
        &PathBuf::from(source_name),
        key_columns,
    )
}

fn parse_csv_reader<R: std::io::Read>(
    reader: R,
    path: &Path,
    key_columns: &[String],
) -> Result<Vec<Record>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| Error::Csv {
        path: path.to_path_buf(),
        source: e,
    })?;

    let columns: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    if columns.is_empty() {
        return Err(Error::Configuration(format!(
            "no columns found in '{}'",
            path.display()
        )));
    }

    // Default key: the first column
    let effective_keys: Vec<String> = if key_columns.is_empty() {
        vec![columns[0].clone()]
    } else {
        key_columns.to_vec()
    };

    let mut records = Vec::new();
    for result in csv_reader.records() {
        let row = result.map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut fields: Vec<(String, FieldValue)> = columns
            .iter()
            .cloned()
            .map(|name| (name, FieldValue::Empty))
            .collect();

        for (i, raw) in row.iter().enumerate().take(columns.len()) {
            fields[i].1 = FieldValue::parse(raw);
        }

        let key = composite_key(&fields, &effective_keys);
        records.push(Record { key, fields });
    }

    Ok(records)
}

/// Render records back to CSV text.
///
/// Columns are the union of all record field names in first-seen order, so
/// records inserted from the other side keep any extra columns they carry.
pub fn render_csv(records: &[Record]) -> String {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for (name, _) in &record.fields {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.clone());
            }
        }
    }

    let mut out = String::new();
    let header: Vec<String> = columns.iter().map(|c| escape_csv(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');

    for record in records {
        let cells: Vec<String> = columns
            .iter()
            .map(|col| {
                record
                    .get(col)
                    .map(|v| escape_csv(&v.to_string_value()))
                    .unwrap_or_default()
            })
            .collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }

    out
}

/// Escape a value for CSV output
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_csv_str_basic() {
        let csv = "id,name,value\n1,foo,100\n2,bar,200\n";
        let records = load_csv_str(csv, "test.csv", &[]).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "1");
        assert_eq!(records[1].key, "2");
        assert_eq!(records[0].get("name"), Some(&FieldValue::Text("foo".to_string())));
        assert_eq!(records[1].get("value"), Some(&FieldValue::Integer(200)));
    }

    #[test]
    fn test_load_csv_str_explicit_key_columns() {
        let csv = "region,id,name\neu,1,foo\nus,1,bar\n";
        let keys = vec!["region".to_string(), "id".to_string()];
        let records = load_csv_str(csv, "test.csv", &keys).unwrap();

        assert_eq!(records[0].key, "eu\u{1f}1");
        assert_eq!(records[1].key, "us\u{1f}1");
    }

    #[test]
    fn test_load_csv_str_short_rows_padded() {
        let csv = "id,name,value\n1,foo\n";
        let records = load_csv_str(csv, "test.csv", &[]).unwrap();

        assert_eq!(records[0].fields.len(), 3);
        assert_eq!(records[0].get("value"), Some(&FieldValue::Empty));
    }

    #[test]
    fn test_render_csv_roundtrip() {
        let csv = "id,name\n1,Sword\n2,\"Axe, heavy\"\n";
        let records = load_csv_str(csv, "test.csv", &[]).unwrap();
        let rendered = render_csv(&records);

        let reparsed = load_csv_str(&rendered, "test.csv", &[]).unwrap();
        assert_eq!(records, reparsed);
    }

    #[test]
    fn test_render_csv_column_union() {
        let keys = vec!["id".to_string()];
        let a = Record::new(
            vec![
                ("id".to_string(), FieldValue::Integer(1)),
                ("name".to_string(), FieldValue::Text("foo".to_string())),
            ],
            &keys,
        );
        let b = Record::new(
            vec![
                ("id".to_string(), FieldValue::Integer(2)),
                ("extra".to_string(), FieldValue::Integer(9)),
            ],
            &keys,
        );

        let rendered = render_csv(&[a, b]);
        assert!(rendered.starts_with("id,name,extra\n"));
    }

    #[test]
    fn test_store_missing_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path());
        let records = store.load_table("absent", &[]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_store_list_tables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("item_svr.csv"), "id\n1\n").unwrap();
        std::fs::write(dir.path().join("npc_svr.csv"), "id\n1\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = TableStore::new(dir.path());
        assert_eq!(store.list_tables().unwrap(), vec!["item_svr", "npc_svr"]);
    }
}
