//! Connection configuration.
//!
//! A [`Config`] is built once at startup (from defaults, the environment, or
//! a deserialized file) and handed by value or reference to every component
//! that needs it. Nothing in the crate mutates it afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

use crate::libs::error::{Error, Result};

/// Administrative database used to check for and create the target database.
pub const BOOTSTRAP_DATABASE: &str = "postgres";

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DatabaseKind {
    #[default]
    Postgres,
}

impl FromStr for DatabaseKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pg" | "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            other => Err(Error::Config(format!("unsupported database kind '{other}'"))),
        }
    }
}

impl TryFrom<String> for DatabaseKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DatabaseKind> for String {
    fn from(kind: DatabaseKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Postgres => f.write_str("pg"),
        }
    }
}

/// Connection pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_min")]
    pub min: u32,
    #[serde(default = "default_pool_max")]
    pub max: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: default_pool_min(),
            max: default_pool_max(),
        }
    }
}

/// Database identity and connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kind: DatabaseKind,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Target database name.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Seconds to wait when establishing a connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

// Keeps the password out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("pool", &self.pool)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::default(),
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            database: default_database(),
            pool: PoolConfig::default(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Config {
    /// Read configuration from the `DB_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, using the same
    /// keys as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(kind) = lookup("DB_TYPE") {
            config.kind = kind.parse()?;
        }
        if let Some(host) = lookup("DB_HOST") {
            config.host = host;
        }
        if let Some(user) = lookup("DB_USER") {
            config.user = user;
        }
        if let Some(password) = lookup("DB_PASS") {
            config.password = password;
        }
        if let Some(database) = lookup("DB_NAME") {
            config.database = database;
        }
        if let Some(port) = lookup("DB_PORT") {
            config.port = parse_number("DB_PORT", &port)?;
        }
        if let Some(min) = lookup("DB_POOL_MIN") {
            config.pool.min = parse_number("DB_POOL_MIN", &min)?;
        }
        if let Some(max) = lookup("DB_POOL_MAX") {
            config.pool.max = parse_number("DB_POOL_MAX", &max)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Copy of this configuration targeting another database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::Config("database name must not be empty".into()));
        }
        if self.pool.max == 0 {
            return Err(Error::Config("pool.max must be greater than 0".into()));
        }
        if self.pool.min > self.pool.max {
            return Err(Error::Config(format!(
                "pool.min ({}) exceeds pool.max ({})",
                self.pool.min, self.pool.max
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Driver options for the configured target database.
    pub fn connect_options(&self) -> PgConnectOptions {
        self.connect_options_for(&self.database)
    }

    /// Driver options for an arbitrary database on the same server.
    pub fn connect_options_for(&self, database: &str) -> PgConnectOptions {
        match self.kind {
            DatabaseKind::Postgres => PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(database),
        }
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a number, got '{raw}'")))
}

fn default_pool_min() -> u32 {
    2
}

fn default_pool_max() -> u32 {
    10
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "cm_user".to_string()
}

fn default_password() -> String {
    "dbpass123".to_string()
}

fn default_database() -> String {
    "cm_user_access_mg".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}
