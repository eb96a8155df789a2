//! Additive schema reconciliation.
//!
//! Each table definition is merged with the standard fields and compared
//! with the live schema. Missing tables are created and missing columns are
//! added. Existing columns are never altered, retyped or dropped.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{debug, info};

use crate::libs::definitions::DefinitionSource;
use crate::libs::error::Result;
use crate::libs::query_builder::{quote_ident, sql_literal};
use crate::libs::schema::{ColumnDefault, ColumnSchema, ColumnType, DefaultFn, TableSchema};

/// A column whose declared type has been validated.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedColumn<'a> {
    pub schema: &'a ColumnSchema,
    pub column_type: ColumnType,
}

impl<'a> ResolvedColumn<'a> {
    pub fn name(&self) -> &'a str {
        &self.schema.name
    }
}

/// Catalog inspection and DDL operations the reconciler relies on.
#[async_trait]
pub trait SchemaCatalog: Send {
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    async fn column_names(&mut self, table: &str) -> Result<HashSet<String>>;

    async fn create_table(&mut self, table: &str, columns: &[ResolvedColumn<'_>]) -> Result<()>;

    async fn add_column(&mut self, table: &str, column: &ResolvedColumn<'_>) -> Result<()>;
}

/// [`SchemaCatalog`] over a live Postgres connection, scoped to the
/// connection's current schema.
pub struct PgCatalog<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgCatalog<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SchemaCatalog for PgCatalog<'_> {
    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )",
        )
        .bind(table)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(exists)
    }

    async fn column_names(&mut self, table: &str) -> Result<HashSet<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(names.into_iter().collect())
    }

    async fn create_table(&mut self, table: &str, columns: &[ResolvedColumn<'_>]) -> Result<()> {
        let ddl = create_table_sql(table, columns);
        debug!("{}", ddl);
        sqlx::query(&ddl).execute(&mut *self.conn).await?;
        Ok(())
    }

    async fn add_column(&mut self, table: &str, column: &ResolvedColumn<'_>) -> Result<()> {
        let ddl = add_column_sql(table, column);
        debug!("{}", ddl);
        sqlx::query(&ddl).execute(&mut *self.conn).await?;
        Ok(())
    }
}

/// What reconciliation did to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    Created { table: String, columns: Vec<String> },
    ColumnsAdded { table: String, columns: Vec<String> },
    Unchanged { table: String },
}

impl TableChange {
    pub fn table(&self) -> &str {
        match self {
            TableChange::Created { table, .. }
            | TableChange::ColumnsAdded { table, .. }
            | TableChange::Unchanged { table } => table,
        }
    }

    /// Number of DDL statements this change issued.
    pub fn mutations(&self) -> usize {
        match self {
            TableChange::Created { .. } => 1,
            TableChange::ColumnsAdded { columns, .. } => columns.len(),
            TableChange::Unchanged { .. } => 0,
        }
    }
}

/// Outcome of a reconciliation run, one entry per table in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tables: Vec<TableChange>,
}

impl ReconcileReport {
    pub fn mutations(&self) -> usize {
        self.tables.iter().map(TableChange::mutations).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.mutations() == 0
    }
}

/// Reconcile every table the source yields, sequentially and fail-fast.
///
/// # Errors
///
/// The first failure stops the run. Failures are wrapped in
/// [`Error::Table`](crate::Error::Table) naming the table being processed.
pub async fn reconcile<C, S>(catalog: &mut C, source: &S) -> Result<ReconcileReport>
where
    C: SchemaCatalog + ?Sized,
    S: DefinitionSource + ?Sized,
{
    let tables = source.definitions()?;
    reconcile_tables(catalog, &tables).await
}

pub async fn reconcile_tables<C>(catalog: &mut C, tables: &[TableSchema]) -> Result<ReconcileReport>
where
    C: SchemaCatalog + ?Sized,
{
    let mut report = ReconcileReport::default();
    for table in tables {
        let change = reconcile_table(catalog, table)
            .await
            .map_err(|e| e.in_table(&table.name))?;
        report.tables.push(change);
    }
    info!(
        "Reconciled {} table(s), {} schema change(s)",
        report.tables.len(),
        report.mutations()
    );
    Ok(report)
}

/// Bring a single table in line with its definition.
pub async fn reconcile_table<C>(catalog: &mut C, table: &TableSchema) -> Result<TableChange>
where
    C: SchemaCatalog + ?Sized,
{
    let effective = table.effective_columns();
    let resolved = effective
        .iter()
        .map(|schema| -> Result<ResolvedColumn> {
            Ok(ResolvedColumn {
                schema,
                column_type: schema.resolve_type(&table.name)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if !catalog.table_exists(&table.name).await? {
        catalog.create_table(&table.name, &resolved).await?;
        info!("Created table {} ({} columns)", table.name, resolved.len());
        return Ok(TableChange::Created {
            table: table.name.clone(),
            columns: resolved.iter().map(|c| c.name().to_string()).collect(),
        });
    }

    let existing = catalog.column_names(&table.name).await?;
    let missing: Vec<&ResolvedColumn<'_>> = resolved
        .iter()
        .filter(|c| !existing.contains(c.name()))
        .collect();

    if missing.is_empty() {
        debug!("Table {} is up to date", table.name);
        return Ok(TableChange::Unchanged {
            table: table.name.clone(),
        });
    }

    let mut added = Vec::with_capacity(missing.len());
    for column in missing {
        catalog.add_column(&table.name, column).await?;
        info!("Added column {}.{}", table.name, column.name());
        added.push(column.name().to_string());
    }

    Ok(TableChange::ColumnsAdded {
        table: table.name.clone(),
        columns: added,
    })
}

/// `"name" type [PRIMARY KEY] [NOT NULL] [DEFAULT ...]`
pub fn column_sql(column: &ResolvedColumn<'_>, with_primary: bool) -> String {
    let schema = column.schema;
    let mut sql = format!("{} {}", quote_ident(&schema.name), column.column_type.sql_type());
    if with_primary && schema.primary {
        sql.push_str(" PRIMARY KEY");
    }
    if schema.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &schema.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_sql(default));
    }
    sql
}

fn default_sql(default: &ColumnDefault) -> String {
    match default {
        ColumnDefault::Function { function } => match function {
            DefaultFn::Now => "CURRENT_TIMESTAMP".to_string(),
            DefaultFn::Uuid => "gen_random_uuid()".to_string(),
        },
        ColumnDefault::Value(value) => sql_literal(value),
    }
}

pub fn create_table_sql(table: &str, columns: &[ResolvedColumn<'_>]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| column_sql(c, true)).collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), cols.join(", "))
}

/// Added columns never carry a primary key constraint.
pub fn add_column_sql(table: &str, column: &ResolvedColumn<'_>) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column_sql(column, false)
    )
}
