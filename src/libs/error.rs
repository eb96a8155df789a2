//! Error type shared by every tablesync component.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by configuration, reconciliation and CRUD dispatch.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unparsable configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A CRUD request arrived without a command name.
    #[error("no command name provided")]
    MissingCommand,

    /// A CRUD request named a command the dispatcher does not know.
    #[error("invalid command name: {0}")]
    InvalidCommand(String),

    /// A command was missing a field it cannot run without.
    #[error("command '{command}' requires '{field}'")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },

    /// Pagination outside the 1-based range.
    #[error("invalid page {page} with page size {page_size}: both must be at least 1")]
    InvalidPage { page: i64, page_size: i64 },

    /// A column declared a type outside the supported set.
    #[error("unsupported column type '{type_name}' for column '{column}' in table '{table}'")]
    UnsupportedColumnType {
        table: String,
        column: String,
        type_name: String,
    },

    /// A table definition file could not be interpreted.
    #[error("invalid table definition {}: {message}", path.display())]
    Definition { path: PathBuf, message: String },

    /// Reconciliation failed while working on a specific table.
    #[error("table '{table}': {source}")]
    Table {
        table: String,
        #[source]
        source: Box<Error>,
    },

    /// Driver, connectivity or SQL failure, surfaced verbatim.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Attach the identity of the table being reconciled.
    pub fn in_table(self, table: impl Into<String>) -> Self {
        match self {
            already @ Error::Table { .. } => already,
            other => Error::Table {
                table: table.into(),
                source: Box::new(other),
            },
        }
    }

    /// True for errors detected before any I/O took place.
    pub fn is_config(&self) -> bool {
        match self {
            Error::Config(_)
            | Error::MissingCommand
            | Error::InvalidCommand(_)
            | Error::MissingField { .. }
            | Error::InvalidPage { .. }
            | Error::UnsupportedColumnType { .. } => true,
            Error::Table { source, .. } => source.is_config(),
            _ => false,
        }
    }
}

/// Convenience alias for results with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
