use std::collections::HashMap;

use serde_json::{Map, Value};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;

/// Column name to Postgres type name (`udt_name`) for one table.
pub type ColumnTypes = HashMap<String, String>;

/// Text form of a JSON value as sent to the server. `None` for `null`,
/// which is always rendered inline.
///
/// Strings go through unchanged; everything else is sent as its JSON text.
/// The server parses the text as the target column's type, so nothing is
/// inferred from what a string happens to look like.
pub fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<String>,
}

impl Statement {
    /// A `sqlx` query with every parameter bound in order.
    pub fn query(&self) -> Query<'_, Postgres, PgArguments> {
        self.params
            .iter()
            .fold(sqlx::query(&self.sql), |query, param| query.bind(param.as_str()))
    }
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a JSON value as an inline SQL literal (used for column defaults).
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        Value::Array(_) | Value::Object(_) => quote_string(&value.to_string()),
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Builds single-table statements with numbered placeholders.
///
/// Conditions are kept unrendered until the statement is finished so their
/// placeholders always follow any SET values. When column types are known
/// each placeholder is cast to its column's type (`$1::"uuid"`).
pub struct QueryBuilder {
    table: String,
    types: ColumnTypes,
    wheres: Vec<(String, Option<String>)>,
    params: Vec<String>,
    limit_clause: Option<String>,
    offset_clause: Option<String>,
    order_clause: Option<String>,
    returning: Option<String>,
}

impl QueryBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            table: quote_ident(table),
            types: ColumnTypes::new(),
            wheres: vec![],
            params: Vec::new(),
            limit_clause: None,
            offset_clause: None,
            order_clause: None,
            returning: None,
        }
    }

    /// Cast parameters to these column types.
    pub fn with_types(mut self, types: &ColumnTypes) -> Self {
        self.types = types.clone();
        self
    }

    fn push_param(&mut self, column: &str, text: String) -> String {
        self.params.push(text);
        let n = self.params.len();
        match self.types.get(column) {
            Some(ty) => format!("${}::{}", n, quote_ident(ty)),
            None => format!("${}", n),
        }
    }

    /// `column = value`, or `column IS NULL` for `null`.
    pub fn where_eq(mut self, column: &str, value: &Value) -> Self {
        self.wheres.push((column.to_string(), param_text(value)));
        self
    }

    /// Equality conjunction over every entry of `conditions`.
    pub fn where_all(self, conditions: &Map<String, Value>) -> Self {
        conditions
            .iter()
            .fold(self, |builder, (column, value)| builder.where_eq(column, value))
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit_clause = Some(format!("LIMIT {}", n));
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset_clause = Some(format!("OFFSET {}", n));
        self
    }

    pub fn order_by(mut self, columns: &[&str]) -> Self {
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        self.order_clause = Some(format!("ORDER BY {}", quoted.join(", ")));
        self
    }

    pub fn returning(mut self, column: &str) -> Self {
        self.returning = Some(format!("RETURNING {}", quote_ident(column)));
        self
    }

    fn render_where(&mut self) -> String {
        if self.wheres.is_empty() {
            return String::new();
        }
        let wheres = std::mem::take(&mut self.wheres);
        let mut clauses = Vec::with_capacity(wheres.len());
        for (column, value) in wheres {
            let clause = match value {
                Some(text) => {
                    let placeholder = self.push_param(&column, text);
                    format!("{} = {}", quote_ident(&column), placeholder)
                }
                None => format!("{} IS NULL", quote_ident(&column)),
            };
            clauses.push(clause);
        }
        format!(" WHERE {}", clauses.join(" AND "))
    }

    fn finish(self, mut sql: String) -> Statement {
        if let Some(returning) = &self.returning {
            sql += &format!(" {}", returning);
        }
        Statement {
            sql,
            params: self.params,
        }
    }

    pub fn select(mut self) -> Statement {
        let mut sql = format!("SELECT * FROM {}", self.table);
        sql += &self.render_where();
        if let Some(order) = &self.order_clause {
            sql += &format!(" {}", order);
        }
        if let Some(limit) = &self.limit_clause {
            sql += &format!(" {}", limit);
        }
        if let Some(offset) = &self.offset_clause {
            sql += &format!(" {}", offset);
        }
        Statement {
            sql,
            params: self.params,
        }
    }

    /// `UPDATE ... SET ... WHERE ...`. SET values are numbered first.
    pub fn update(mut self, updates: &Map<String, Value>) -> Statement {
        let mut sets = Vec::with_capacity(updates.len());
        for (column, value) in updates {
            let rhs = match param_text(value) {
                Some(text) => self.push_param(column, text),
                None => "NULL".to_string(),
            };
            sets.push(format!("{} = {}", quote_ident(column), rhs));
        }
        let where_sql = self.render_where();
        let sql = format!("UPDATE {} SET {}{}", self.table, sets.join(", "), where_sql);
        self.finish(sql)
    }

    pub fn delete(mut self) -> Statement {
        let where_sql = self.render_where();
        let sql = format!("DELETE FROM {}{}", self.table, where_sql);
        self.finish(sql)
    }

    /// Multi-row insert. Columns are the union of the records' keys in
    /// first-seen order; a record missing a column gets `DEFAULT`.
    pub fn insert(mut self, records: &[Map<String, Value>]) -> Statement {
        let mut columns: Vec<&str> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }

        if columns.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES", self.table);
            return self.finish(sql);
        }

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let mut cells = Vec::with_capacity(columns.len());
            for column in &columns {
                let cell = match record.get(*column) {
                    None => "DEFAULT".to_string(),
                    Some(value) => match param_text(value) {
                        Some(text) => self.push_param(column, text),
                        None => "NULL".to_string(),
                    },
                };
                cells.push(cell);
            }
            rows.push(format!("({})", cells.join(", ")));
        }

        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            quoted.join(", "),
            rows.join(", ")
        );
        self.finish(sql)
    }
}
