//! Where table definitions come from.
//!
//! The reconciler only needs a list of [`TableSchema`] values. A
//! [`DirectorySource`] reads them from disk, one table per entry:
//!
//! ```text
//! tables/
//! ├── customers/
//! │   └── table.json      {"columns": {"name": {"type": "string"}}}
//! └── orders.json         {"columns": {"total": {"type": "integer", "notNullable": true}}}
//! ```
//!
//! The table name is the directory name or the file stem. Tables are
//! returned sorted by name so reconciliation order does not depend on the
//! filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::libs::error::{Error, Result};
use crate::libs::schema::{ColumnDefault, ColumnSchema, TableSchema};

/// File holding a table definition inside a table directory.
pub const TABLE_FILE: &str = "table.json";

/// Anything that can produce table definitions.
pub trait DefinitionSource {
    fn definitions(&self) -> Result<Vec<TableSchema>>;
}

impl DefinitionSource for Vec<TableSchema> {
    fn definitions(&self) -> Result<Vec<TableSchema>> {
        Ok(self.clone())
    }
}

impl DefinitionSource for [TableSchema] {
    fn definitions(&self) -> Result<Vec<TableSchema>> {
        Ok(self.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    columns: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnEntry {
    #[serde(rename = "type")]
    column_type: String,
    #[serde(default)]
    not_nullable: bool,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    default_to: Option<ColumnDefault>,
}

/// Reads table definitions from a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DefinitionSource for DirectorySource {
    fn definitions(&self) -> Result<Vec<TableSchema>> {
        let mut tables = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let located = if path.is_dir() {
                let file = path.join(TABLE_FILE);
                file.is_file().then(|| (file_name(&path), file))
            } else if path.extension().is_some_and(|ext| ext == "json") {
                path.file_stem()
                    .map(|stem| (stem.to_string_lossy().into_owned(), path.clone()))
            } else {
                None
            };

            match located {
                Some((name, file)) => tables.push(parse_definition(name, &file)?),
                None => debug!("Skipping {} (not a table definition)", path.display()),
            }
        }

        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse one definition file into a table named `name`.
pub fn parse_definition(name: String, file: &Path) -> Result<TableSchema> {
    let invalid = |message: String| Error::Definition {
        path: file.to_path_buf(),
        message,
    };

    let raw = fs::read_to_string(file)?;
    let parsed: DefinitionFile =
        serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;

    let mut table = TableSchema::new(name);
    for (column_name, value) in parsed.columns {
        let entry: ColumnEntry = serde_json::from_value(value)
            .map_err(|e| invalid(format!("column '{column_name}': {e}")))?;
        table = table.column(ColumnSchema {
            name: column_name,
            column_type: entry.column_type,
            primary: entry.primary,
            not_null: entry.not_nullable,
            default: entry.default_to,
        });
    }
    Ok(table)
}
