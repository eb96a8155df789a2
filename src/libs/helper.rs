use tracing::{error, info};

use crate::libs::config::Config;
use crate::libs::connection::ConnectionManager;
use crate::libs::crud::{Command, CrudOutcome, CrudRequest, dispatch};
use crate::libs::definitions::DefinitionSource;
use crate::libs::error::Result;
use crate::libs::reconcile::{PgCatalog, ReconcileReport, reconcile_tables};

/// Entry point bundling configuration, schema sync and CRUD dispatch.
///
/// ```no_run
/// use tablesync::{Config, CrudRequest, DbHelper, DirectorySource};
///
/// # async fn run() -> tablesync::Result<()> {
/// let helper = DbHelper::new(Config::from_env()?.with_database("order_management"));
/// helper.initialize().await?;
/// helper.load_tables(&DirectorySource::new("./tables")).await?;
///
/// let request: CrudRequest = serde_json::from_value(serde_json::json!({
///     "commandName": "list",
///     "tableName": "orders",
///     "page": 1,
///     "pageSize": 10
/// }))?;
/// let rows = helper.execute(request).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DbHelper {
    connections: ConnectionManager,
}

impl DbHelper {
    pub fn new(config: Config) -> Self {
        Self {
            connections: ConnectionManager::new(config),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    pub fn config(&self) -> &Config {
        self.connections.config()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Make sure the configured database exists.
    pub async fn initialize(&self) -> Result<bool> {
        self.connections
            .ensure_database_exists(&self.config().database)
            .await
    }

    // -------- Sync tables --------
    /// Reconcile every definition from `source` against the configured
    /// database over a single connection, closed on every path. A
    /// reconciliation error takes precedence over a close error.
    pub async fn load_tables<S>(&self, source: &S) -> Result<ReconcileReport>
    where
        S: DefinitionSource + ?Sized,
    {
        let definitions = source.definitions()?;
        let mut conn = self.connections.connect().await?;

        let outcome = {
            let mut catalog = PgCatalog::new(&mut conn);
            reconcile_tables(&mut catalog, &definitions).await
        };
        let closed = self.connections.close(conn).await;

        match outcome {
            Ok(report) => {
                closed?;
                info!("All tables loaded successfully.");
                Ok(report)
            }
            Err(e) => {
                error!("Error loading tables: {}", e);
                Err(e)
            }
        }
    }

    // -------- CRUD --------
    /// Validate and run a loosely-typed request. Invalid requests fail
    /// without opening a connection.
    pub async fn execute(&self, request: CrudRequest) -> Result<CrudOutcome> {
        let command = Command::try_from(request)?;
        self.run(&command).await
    }

    /// Run a command on its own connection.
    pub async fn run(&self, command: &Command) -> Result<CrudOutcome> {
        let mut conn = self.connections.connect().await?;
        let outcome = dispatch(&mut conn, command).await;
        let closed = self.connections.close(conn).await;

        let result = outcome?;
        closed?;
        Ok(result)
    }
}
