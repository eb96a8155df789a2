//! Connection lifecycle: making sure the database exists, opening
//! connections to it and closing them again.

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use tracing::{debug, info, warn};

use crate::libs::config::{BOOTSTRAP_DATABASE, Config};
use crate::libs::error::Result;
use crate::libs::query_builder::quote_ident;

/// Hands out connections for one configured database.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: Config,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create database `name` if the server does not have it yet.
    ///
    /// Works through the bootstrap database, never the target itself. The
    /// bootstrap connection is closed on every path. Returns `true` when the
    /// database was created by this call.
    pub async fn ensure_database_exists(&self, name: &str) -> Result<bool> {
        let options = self.config.connect_options_for(BOOTSTRAP_DATABASE);
        let mut admin = PgConnection::connect_with(&options).await?;

        let outcome = create_if_missing(&mut admin, name).await;
        let closed = admin.close().await;

        let created = outcome?;
        if let Err(e) = closed {
            warn!("Error closing bootstrap connection: {}", e);
            return Err(e.into());
        }
        Ok(created)
    }

    /// A new connection to the configured database.
    pub async fn connect(&self) -> Result<PgConnection> {
        let conn = PgConnection::connect_with(&self.config.connect_options()).await?;
        debug!("Connected to {}", self.config.database);
        Ok(conn)
    }

    /// A pool for the configured database, sized by the pool bounds.
    pub async fn connect_pool(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .min_connections(self.config.pool.min)
            .max_connections(self.config.pool.max)
            .acquire_timeout(self.config.connect_timeout())
            .connect_with(self.config.connect_options())
            .await?;
        Ok(pool)
    }

    /// Close a connection. Failures are logged and returned.
    pub async fn close(&self, conn: PgConnection) -> Result<()> {
        match conn.close().await {
            Ok(()) => {
                debug!("Database connection closed.");
                Ok(())
            }
            Err(e) => {
                warn!("Error closing database connection: {}", e);
                Err(e.into())
            }
        }
    }
}

async fn create_if_missing(conn: &mut PgConnection, name: &str) -> Result<bool> {
    let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();

    if exists {
        debug!("Database {} already exists", name);
        return Ok(false);
    }

    // CREATE DATABASE cannot be parameterized.
    let sql = format!("CREATE DATABASE {}", quote_ident(name));
    sqlx::raw_sql(&sql).execute(&mut *conn).await?;
    info!("Created database {}", name);
    Ok(true)
}
