// schema.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::libs::error::{Error, Result};

/// Column types a table definition may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Uuid,
    /// Timezone-aware timestamp with microsecond precision.
    Timestamptz,
    Integer,
    String,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Uuid => "uuid",
            ColumnType::Timestamptz => "timestamptz",
            ColumnType::Integer => "integer",
            ColumnType::String => "string",
        }
    }

    /// Postgres type used in DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Uuid => "uuid",
            ColumnType::Timestamptz => "timestamptz(6)",
            ColumnType::Integer => "integer",
            ColumnType::String => "varchar(255)",
        }
    }
}

impl FromStr for ColumnType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "uuid" => Ok(ColumnType::Uuid),
            "timestamptz" => Ok(ColumnType::Timestamptz),
            "integer" => Ok(ColumnType::Integer),
            "string" => Ok(ColumnType::String),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side functions a column default may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultFn {
    /// Current timestamp at insert time.
    Now,
    /// A random UUID generated by the server.
    Uuid,
}

/// Default applied to a column when a row omits it.
///
/// In definition files a static default is any JSON value
/// (`"defaultTo": "draft"`), a computed one is an object naming the
/// function (`"defaultTo": {"fn": "now"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDefault {
    Function {
        #[serde(rename = "fn")]
        function: DefaultFn,
    },
    Value(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    /// Declared type name, resolved against [`ColumnType`] at reconcile time.
    pub column_type: String,
    pub primary: bool,
    pub not_null: bool,
    pub default: Option<ColumnDefault>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            primary: false,
            not_null: false,
            default: None,
        }
    }

    pub fn typed(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self::new(name, column_type.as_str())
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    pub fn default_fn(mut self, function: DefaultFn) -> Self {
        self.default = Some(ColumnDefault::Function { function });
        self
    }

    /// Resolve the declared type name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedColumnType`] naming the table, column and
    /// offending type.
    pub fn resolve_type(&self, table: &str) -> Result<ColumnType> {
        self.column_type
            .parse()
            .map_err(|_| Error::UnsupportedColumnType {
                table: table.to_string(),
                column: self.name.clone(),
                type_name: self.column_type.clone(),
            })
    }
}

/// A table and the columns it declares, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column. A column with the same name is replaced in place.
    pub fn column(mut self, column: ColumnSchema) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Standard fields first, then every declared column whose name is not a
    /// standard field. Declared columns that collide with a standard field
    /// are dropped.
    pub fn effective_columns(&self) -> Vec<ColumnSchema> {
        merge_columns(&standard_fields(), &self.columns)
    }
}

/// Audit and identity columns carried by every managed table.
pub fn standard_fields() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::typed("id", ColumnType::Uuid).primary().not_null(),
        ColumnSchema::typed("createdDate_tz", ColumnType::Timestamptz)
            .not_null()
            .default_fn(DefaultFn::Now),
        ColumnSchema::typed("deletedDate_tz", ColumnType::Timestamptz),
        ColumnSchema::typed("createdById", ColumnType::Uuid),
        ColumnSchema::typed("createdByName", ColumnType::String),
    ]
}

/// Union of `base` and `extra`; `base` wins on name collisions.
pub fn merge_columns(base: &[ColumnSchema], extra: &[ColumnSchema]) -> Vec<ColumnSchema> {
    let mut merged = base.to_vec();
    for column in extra {
        if !merged.iter().any(|c| c.name == column.name) {
            merged.push(column.clone());
        }
    }
    merged
}
