use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::libs::crud::{Command, CrudOutcome};
use crate::libs::error::{Error, Result};
use crate::libs::helper::DbHelper;

/// A typed handle to a database table.
///
/// Rows are converted through `serde_json`, so `T` field names must match
/// column names (use `#[serde(rename = "...")]` for camelCase columns).
pub struct Table<'h, T> {
    helper: &'h DbHelper,
    name: String,
    _marker: std::marker::PhantomData<T>,
}

impl<'h, T> Table<'h, T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a new table handle.
    /// ```no_run
    /// # use tablesync::{Config, DbHelper, Table};
    /// # #[derive(serde::Serialize, serde::Deserialize)] struct User { name: String }
    /// let helper = DbHelper::new(Config::default());
    /// let users = Table::<User>::new(&helper, "users");
    /// ```
    pub fn new(helper: &'h DbHelper, name: &str) -> Self {
        Self {
            helper,
            name: name.to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a record, returning its identifier.
    pub async fn insert(&self, item: &T) -> Result<Value> {
        let command = Command::insert(&self.name, serde_json::to_value(item)?)?;
        let ids = expect_ids(self.helper.run(&command).await?);
        ids.into_iter()
            .next()
            .ok_or(Error::Database(sqlx::Error::RowNotFound))
    }

    /// Records matching every `column = value` pair in `filter`.
    ///
    /// # Example
    /// ```no_run
    /// # use tablesync::{Config, DbHelper, Table};
    /// # #[derive(serde::Serialize, serde::Deserialize)] struct User { name: String }
    /// # async fn run() -> tablesync::Result<()> {
    /// # let helper = DbHelper::new(Config::default());
    /// let users = Table::<User>::new(&helper, "users");
    /// let ada = users.load(serde_json::json!({"name": "Ada"})).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load(&self, filter: Value) -> Result<Vec<T>> {
        let command = Command::load(&self.name, object(filter, "filter")?);
        decode_rows(self.helper.run(&command).await?.into_rows())
    }

    /// First record matching `filter`, if any.
    pub async fn first(&self, filter: Value) -> Result<Option<T>> {
        Ok(self.load(filter).await?.into_iter().next())
    }

    /// One 1-based page of records.
    pub async fn list(&self, page: i64, page_size: i64) -> Result<Vec<T>> {
        let command = Command::list(&self.name, page, page_size)?;
        decode_rows(self.helper.run(&command).await?.into_rows())
    }

    /// Apply `changes` to records matching `filter`; returns the row count.
    pub async fn update(&self, filter: Value, changes: Value) -> Result<u64> {
        let command = Command::update(
            &self.name,
            object(filter, "filter")?,
            object(changes, "changes")?,
        )?;
        Ok(affected(self.helper.run(&command).await?))
    }

    /// Delete records matching `filter`; returns the row count.
    pub async fn delete(&self, filter: Value) -> Result<u64> {
        let command = Command::del(&self.name, object(filter, "filter")?)?;
        Ok(affected(self.helper.run(&command).await?))
    }
}

fn object(value: Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Config(format!("{what} must be a JSON object, got {other}"))),
    }
}

fn expect_ids(outcome: CrudOutcome) -> Vec<Value> {
    match outcome {
        CrudOutcome::Ids(ids) => ids,
        _ => Vec::new(),
    }
}

fn affected(outcome: CrudOutcome) -> u64 {
    match outcome {
        CrudOutcome::Affected(n) => n,
        _ => 0,
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}
