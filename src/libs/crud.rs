//! Generic CRUD dispatch.
//!
//! Callers describe an operation either as a [`Command`] directly or as a
//! loosely-typed [`CrudRequest`] (the JSON-shaped surface) that is validated
//! into one. Validation happens before any connection is touched.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgConnection, Row, TypeInfo};
use tracing::debug;
use uuid::Uuid;

use crate::libs::error::{Error, Result};
use crate::libs::query_builder::{ColumnTypes, QueryBuilder, Statement};

/// Column every managed table is keyed by.
pub const ID_COLUMN: &str = "id";

/// `list` order: creation time, then id to break ties.
pub const LIST_ORDER: [&str; 2] = ["createdDate_tz", ID_COLUMN];

/// Loosely-typed CRUD request, as accepted from callers speaking JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrudRequest {
    #[serde(default)]
    pub command_name: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub conditions: Option<Map<String, Value>>,
    #[serde(default)]
    pub updates: Option<Map<String, Value>>,
    /// A record or an array of records.
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
    #[serde(default)]
    pub sql: Option<String>,
}

/// A validated CRUD operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load {
        table: String,
        conditions: Map<String, Value>,
    },
    List {
        table: String,
        page: u64,
        page_size: u64,
    },
    Update {
        table: String,
        conditions: Map<String, Value>,
        updates: Map<String, Value>,
    },
    Insert {
        table: String,
        records: Vec<Map<String, Value>>,
    },
    Del {
        table: String,
        conditions: Map<String, Value>,
    },
    /// Executed verbatim. The caller owns injection safety.
    Raw { sql: String },
}

/// Result of a dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CrudOutcome {
    Rows(Vec<Value>),
    Affected(u64),
    Ids(Vec<Value>),
}

impl CrudOutcome {
    pub fn into_rows(self) -> Vec<Value> {
        match self {
            CrudOutcome::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }
}

impl Command {
    pub fn load(table: impl Into<String>, conditions: Map<String, Value>) -> Self {
        Command::Load {
            table: table.into(),
            conditions,
        }
    }

    /// A 1-based page. Rejects `page < 1`, `page_size < 1` and pages whose
    /// offset does not fit in a Postgres `bigint`.
    pub fn list(table: impl Into<String>, page: i64, page_size: i64) -> Result<Self> {
        let offset = page.checked_sub(1).and_then(|p| p.checked_mul(page_size));
        if page < 1 || page_size < 1 || offset.is_none() {
            return Err(Error::InvalidPage { page, page_size });
        }
        Ok(Command::List {
            table: table.into(),
            page: page as u64,
            page_size: page_size as u64,
        })
    }

    pub fn update(
        table: impl Into<String>,
        conditions: Map<String, Value>,
        updates: Map<String, Value>,
    ) -> Result<Self> {
        if conditions.is_empty() {
            return Err(Error::MissingField {
                command: "update",
                field: "conditions",
            });
        }
        if updates.is_empty() {
            return Err(Error::MissingField {
                command: "update",
                field: "updates",
            });
        }
        Ok(Command::Update {
            table: table.into(),
            conditions,
            updates,
        })
    }

    /// Accepts an object or an array of objects. Records without an `id`
    /// are given a fresh UUID.
    pub fn insert(table: impl Into<String>, data: Value) -> Result<Self> {
        let records = match data {
            Value::Object(record) => vec![record],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Ok(record),
                    _ => Err(Error::Config(
                        "insert data must be an object or an array of objects".into(),
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(Error::Config(
                    "insert data must be an object or an array of objects".into(),
                ));
            }
        };
        if records.is_empty() {
            return Err(Error::MissingField {
                command: "insert",
                field: "data",
            });
        }
        Ok(Command::Insert {
            table: table.into(),
            records: records.into_iter().map(with_generated_id).collect(),
        })
    }

    pub fn del(table: impl Into<String>, conditions: Map<String, Value>) -> Result<Self> {
        if conditions.is_empty() {
            return Err(Error::MissingField {
                command: "del",
                field: "conditions",
            });
        }
        Ok(Command::Del {
            table: table.into(),
            conditions,
        })
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Command::Raw { sql: sql.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Load { .. } => "load",
            Command::List { .. } => "list",
            Command::Update { .. } => "update",
            Command::Insert { .. } => "insert",
            Command::Del { .. } => "del",
            Command::Raw { .. } => "raw",
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Command::Load { table, .. }
            | Command::List { table, .. }
            | Command::Update { table, .. }
            | Command::Insert { table, .. }
            | Command::Del { table, .. } => Some(table),
            Command::Raw { .. } => None,
        }
    }

    /// The statement a table command runs, with parameters cast to
    /// `types`. `None` for raw SQL.
    pub fn statement(&self, types: &ColumnTypes) -> Option<Statement> {
        let statement = match self {
            Command::Load { table, conditions } => QueryBuilder::new(table)
                .with_types(types)
                .where_all(conditions)
                .select(),
            Command::List {
                table,
                page,
                page_size,
            } => QueryBuilder::new(table)
                .order_by(&LIST_ORDER)
                .limit(*page_size)
                .offset(page.saturating_sub(1).saturating_mul(*page_size))
                .select(),
            Command::Update {
                table,
                conditions,
                updates,
            } => QueryBuilder::new(table)
                .with_types(types)
                .where_all(conditions)
                .update(updates),
            Command::Insert { table, records } => QueryBuilder::new(table)
                .with_types(types)
                .returning(ID_COLUMN)
                .insert(records),
            Command::Del { table, conditions } => QueryBuilder::new(table)
                .with_types(types)
                .where_all(conditions)
                .delete(),
            Command::Raw { .. } => return None,
        };
        Some(statement)
    }
}

/// Give a record without an `id` (or with a null one) a fresh UUID.
fn with_generated_id(mut record: Map<String, Value>) -> Map<String, Value> {
    let missing = record.get(ID_COLUMN).is_none_or(Value::is_null);
    if missing {
        record.insert(
            ID_COLUMN.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
    record
}

impl TryFrom<CrudRequest> for Command {
    type Error = Error;

    fn try_from(request: CrudRequest) -> Result<Self> {
        let name = request.command_name.ok_or(Error::MissingCommand)?;
        if name == "raw" {
            let sql = request.sql.ok_or(Error::MissingField {
                command: "raw",
                field: "sql",
            })?;
            return Ok(Command::raw(sql));
        }

        let command: &'static str = match name.as_str() {
            "load" => "load",
            "list" => "list",
            "update" => "update",
            "insert" => "insert",
            "del" => "del",
            _ => return Err(Error::InvalidCommand(name)),
        };

        let table = request
            .table_name
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingField {
                command,
                field: "tableName",
            })?;
        let conditions = request.conditions.unwrap_or_default();

        match command {
            "load" => Ok(Command::load(table, conditions)),
            "list" => {
                let page = request.page.ok_or(Error::MissingField {
                    command,
                    field: "page",
                })?;
                let page_size = request.page_size.ok_or(Error::MissingField {
                    command,
                    field: "pageSize",
                })?;
                Command::list(table, page, page_size)
            }
            "update" => Command::update(table, conditions, request.updates.unwrap_or_default()),
            "insert" => {
                let data = request.data.ok_or(Error::MissingField {
                    command,
                    field: "data",
                })?;
                Command::insert(table, data)
            }
            _ => Command::del(table, conditions),
        }
    }
}

/// Run a command on `conn`. Resolves exactly once, with a result or an error.
pub async fn dispatch(conn: &mut PgConnection, command: &Command) -> Result<CrudOutcome> {
    debug!(
        "Dispatching {} on {}",
        command.name(),
        command.table().unwrap_or("<raw>")
    );

    // Parameters travel as text and are cast to the live column types.
    let types = match command {
        Command::Load { table, .. }
        | Command::Update { table, .. }
        | Command::Insert { table, .. }
        | Command::Del { table, .. } => column_types(conn, table).await?,
        Command::List { .. } | Command::Raw { .. } => ColumnTypes::new(),
    };

    match (command, command.statement(&types)) {
        (Command::Raw { sql }, _) => {
            let rows = sqlx::raw_sql(sql).fetch_all(&mut *conn).await?;
            Ok(CrudOutcome::Rows(rows_to_json(&rows)?))
        }
        (Command::Load { .. } | Command::List { .. }, Some(statement)) => {
            let rows = statement.query().fetch_all(&mut *conn).await?;
            Ok(CrudOutcome::Rows(rows_to_json(&rows)?))
        }
        (Command::Update { .. } | Command::Del { .. }, Some(statement)) => {
            let result = statement.query().execute(&mut *conn).await?;
            Ok(CrudOutcome::Affected(result.rows_affected()))
        }
        (Command::Insert { .. }, Some(statement)) => {
            let rows = statement.query().fetch_all(&mut *conn).await?;
            let ids = rows
                .iter()
                .map(|row| column_to_json(row, 0))
                .collect::<Result<Vec<_>>>()?;
            Ok(CrudOutcome::Ids(ids))
        }
        (_, None) => Err(Error::Config(format!(
            "command '{}' produced no statement",
            command.name()
        ))),
    }
}

/// Column types of `table` in the connection's current schema.
pub async fn column_types(conn: &mut PgConnection, table: &str) -> Result<ColumnTypes> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name::text, udt_name::text FROM information_schema.columns
         WHERE table_schema = current_schema() AND table_name = $1",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Decode rows into JSON objects keyed by column name.
pub fn rows_to_json(rows: &[PgRow]) -> Result<Vec<Value>> {
    rows.iter().map(row_to_json).collect()
}

pub fn row_to_json(row: &PgRow) -> Result<Value> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_to_json(row, index)?);
    }
    Ok(Value::Object(map))
}

/// Decode one column by its Postgres type.
fn column_to_json(row: &PgRow, index: usize) -> Result<Value> {
    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(Value::from),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)?
            .map(|id| Value::String(id.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|ts| Value::String(ts.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|ts| Value::String(ts.to_string())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|d| Value::String(d.to_string())),
        // Kept as a string so no precision is lost.
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(index)?
            .map(|d| Value::String(d.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        // Text types. Anything else fails to decode and is reported.
        _ => row.try_get::<Option<String>, _>(index)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
        use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn request(value: Value) -> CrudRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_command_name_is_rejected() {
        let err = Command::try_from(request(json!({"tableName": "users"}))).unwrap_err();
        assert!(matches!(err, Error::MissingCommand));
        assert!(err.is_config());
    }

    #[test]
    fn unknown_command_name_is_rejected() {
        let err = Command::try_from(request(json!({"commandName": "truncate", "tableName": "users"})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(ref n) if n == "truncate"));
    }

    #[test]
    fn table_commands_need_a_table() {
        let err = Command::try_from(request(json!({"commandName": "load"}))).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "tableName", .. }));
    }

    #[test]
    fn load_builds_equality_conjunction() {
        let command = Command::try_from(request(json!({
            "commandName": "load",
            "tableName": "users",
            "conditions": {"email": "ada@mail.com", "age": 36}
        })))
        .unwrap();
        let stmt = command.statement(&ColumnTypes::new()).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"email\" = $1 AND \"age\" = $2"
        );
    }

    #[test]
    fn load_without_conditions_selects_everything() {
        let stmt = Command::load("users", Map::new()).statement(&ColumnTypes::new()).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\"");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn list_offsets_by_page() {
        let first = Command::list("users", 1, 10)
            .unwrap()
            .statement(&ColumnTypes::new())
            .unwrap();
        assert_eq!(
            first.sql,
            "SELECT * FROM \"users\" ORDER BY \"createdDate_tz\", \"id\" LIMIT 10 OFFSET 0"
        );

        let third = Command::list("users", 3, 10)
            .unwrap()
            .statement(&ColumnTypes::new())
            .unwrap();
        assert_eq!(
            third.sql,
            "SELECT * FROM \"users\" ORDER BY \"createdDate_tz\", \"id\" LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn list_rejects_offsets_past_bigint() {
        assert!(matches!(
            Command::list("users", i64::MAX, i64::MAX),
            Err(Error::InvalidPage { .. })
        ));
        assert!(Command::list("users", i64::MAX / 2 + 2, 2).is_err());
        assert!(Command::list("users", i64::MIN, 10).is_err());

        // The largest representable offset is still accepted.
        let command = Command::list("users", 2, i64::MAX).unwrap();
        let stmt = command.statement(&ColumnTypes::new()).unwrap();
        assert!(stmt.sql.ends_with(&format!("OFFSET {}", i64::MAX)));

        // Hand-built pages never panic while rendering.
        let huge = Command::List {
            table: "users".into(),
            page: u64::MAX,
            page_size: u64::MAX,
        };
        assert!(huge.statement(&ColumnTypes::new()).is_some());
    }

    #[test]
    fn list_rejects_non_positive_pages() {
        assert!(matches!(
            Command::list("users", 0, 10),
            Err(Error::InvalidPage { page: 0, page_size: 10 })
        ));
        assert!(Command::list("users", -2, 10).is_err());
        assert!(Command::list("users", 1, 0).is_err());

        let err = Command::try_from(request(json!({
            "commandName": "list",
            "tableName": "users",
            "page": 0,
            "pageSize": 10
        })))
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn list_requires_paging_fields() {
        let err = Command::try_from(request(json!({"commandName": "list", "tableName": "users", "page": 1})))
            .unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "pageSize", .. }));
    }

    #[test]
    fn insert_generates_missing_ids() {
        let command = Command::insert("users", json!({"name": "Ada"})).unwrap();
        let stmt = command.statement(&ColumnTypes::new()).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"id\") VALUES ($1, $2) RETURNING \"id\""
        );
        assert!(Uuid::parse_str(&stmt.params[1]).is_ok());
    }

    #[test]
    fn insert_keeps_caller_ids() {
        let id = Uuid::new_v4();
        let command = Command::insert(
            "users",
            json!([{"id": id.to_string(), "name": "Ada"}, {"name": "Joe"}]),
        )
        .unwrap();
        let stmt = command.statement(&ColumnTypes::new()).unwrap();
        assert_eq!(stmt.params[0], id.to_string());
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn insert_rejects_scalars_and_empty_arrays() {
        assert!(Command::insert("users", json!(42)).unwrap_err().is_config());
        assert!(Command::insert("users", json!([1, 2])).unwrap_err().is_config());
        assert!(matches!(
            Command::insert("users", json!([])),
            Err(Error::MissingField { field: "data", .. })
        ));
    }

    #[test]
    fn update_and_del_need_conditions() {
        let updates = map(json!({"name": "Joe"}));
        assert!(Command::update("users", Map::new(), updates.clone()).is_err());
        assert!(Command::update("users", map(json!({"id": 1})), Map::new()).is_err());
        assert!(Command::del("users", Map::new()).is_err());

        let stmt = Command::update("users", map(json!({"name": "Ada"})), updates)
            .unwrap()
            .statement(&ColumnTypes::new())
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"name\" = $2"
        );

        let stmt = Command::del("users", map(json!({"name": "Ada"})))
            .unwrap()
            .statement(&ColumnTypes::new())
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"users\" WHERE \"name\" = $1");
    }

    #[test]
    fn empty_conditions_load_everything_but_never_mutate() {
        let load = Command::try_from(request(json!({
            "commandName": "load",
            "tableName": "users"
        })))
        .unwrap();
        assert_eq!(
            load.statement(&ColumnTypes::new()).unwrap().sql,
            "SELECT * FROM \"users\""
        );

        let update = Command::try_from(request(json!({
            "commandName": "update",
            "tableName": "users",
            "conditions": {},
            "updates": {"name": "Joe"}
        })))
        .unwrap_err();
        assert!(matches!(
            update,
            Error::MissingField { command: "update", field: "conditions" }
        ));

        let del = Command::try_from(request(json!({"commandName": "del", "tableName": "users"})))
            .unwrap_err();
        assert!(matches!(
            del,
            Error::MissingField { command: "del", field: "conditions" }
        ));
    }

    #[test]
    fn conditions_cast_to_live_column_types() {
        let types: ColumnTypes = [("label", "varchar"), ("id", "uuid")]
            .into_iter()
            .map(|(c, t)| (c.to_string(), t.to_string()))
            .collect();
        let command = Command::load(
            "items",
            map(json!({"label": "2024-03-01T10:00:00Z", "id": "A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11"})),
        );
        let stmt = command.statement(&types).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"items\" WHERE \"label\" = $1::\"varchar\" AND \"id\" = $2::\"uuid\""
        );
        assert_eq!(
            stmt.params,
            vec![
                "2024-03-01T10:00:00Z".to_string(),
                "A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11".to_string(),
            ]
        );
    }

    #[test]
    fn raw_sql_passes_through_verbatim() {
        let sql = "DELETE FROM \"user\" WHERE id='1'; SELECT 1";
        let command = Command::try_from(request(json!({"commandName": "raw", "sql": sql}))).unwrap();
        assert_eq!(command, Command::Raw { sql: sql.to_string() });
        assert!(command.statement(&ColumnTypes::new()).is_none());
        assert_eq!(command.table(), None);
    }

    #[test]
    fn raw_without_sql_is_rejected() {
        let err = Command::try_from(request(json!({"commandName": "raw"}))).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "sql", .. }));
    }

    #[test]
    fn outcome_serializes_flat() {
        assert_eq!(serde_json::to_value(CrudOutcome::Affected(3)).unwrap(), json!(3));
        assert_eq!(
            serde_json::to_value(CrudOutcome::Rows(vec![json!({"a": 1})])).unwrap(),
            json!([{"a": 1}])
        );
    }
}
