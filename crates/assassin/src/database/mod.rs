//! Coordination store access
//!
//! SQLite, PostgreSQL and MySQL are supported through SeaORM. Row locks
//! (`SELECT ... FOR UPDATE`) are only honoured by PostgreSQL and MySQL; on
//! SQLite the permit flip in the task repository is a conditional update so
//! exclusivity holds there too.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseBackend, DatabaseConnection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::config::defaults::DEFAULT_MAX_CONNECTIONS;

pub mod migrations;
pub mod repositories;

/// Shared connection pool plus the backend it talks to
#[derive(Clone)]
pub struct Database {
    connection: Arc<DatabaseConnection>,
    backend: DatabaseBackend,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let backend = backend_for_url(&config.url)?;
        let url = match backend {
            DatabaseBackend::Sqlite => sqlite_url_with_create_mode(&config.url)?,
            _ => config.url.clone(),
        };
        info!(backend = ?backend, "Connecting to coordination store");

        // An in-memory SQLite database lives and dies with its connection,
        // so the pool must never hold more than one.
        let in_memory = url.contains(":memory:");
        let mut options = ConnectOptions::new(&url);
        options
            .max_connections(if in_memory {
                1
            } else {
                config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
            })
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        if !in_memory {
            options
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800));
        }

        let connection = SeaOrmDatabase::connect(options)
            .await
            .with_context(|| format!("Failed to connect to database at '{}'", config.url))?;
        debug!("Database connection established");

        Ok(Self {
            connection: Arc::new(connection),
            backend,
        })
    }

    /// Bring the schema up to date
    pub async fn migrate(&self) -> Result<()> {
        use migrations::Migrator;
        use sea_orm_migration::MigratorTrait;

        Migrator::up(&*self.connection, None)
            .await
            .context("Failed to run migrations")?;
        info!(backend = ?self.backend, "Database migrations applied");
        Ok(())
    }

    /// Cheap round trip used by the health endpoint
    pub async fn ping(&self) -> bool {
        self.connection
            .execute_unprepared("SELECT 1")
            .await
            .is_ok()
    }

    pub fn connection(&self) -> Arc<DatabaseConnection> {
        self.connection.clone()
    }
}

fn backend_for_url(url: &str) -> Result<DatabaseBackend> {
    if url.starts_with("sqlite:") {
        Ok(DatabaseBackend::Sqlite)
    } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        Ok(DatabaseBackend::Postgres)
    } else if url.starts_with("mysql:") {
        Ok(DatabaseBackend::MySql)
    } else {
        anyhow::bail!("Unsupported database URL: {}", url)
    }
}

/// Append `mode=rwc` to the URL of a SQLite file that does not exist yet,
/// creating its parent directory on the way
fn sqlite_url_with_create_mode(url: &str) -> Result<String> {
    if url.contains("mode=") || url.contains(":memory:") {
        return Ok(url.to_string());
    }

    let file = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .with_context(|| format!("Invalid SQLite URL: {url}"))?;
    let path = Path::new(file);
    if path.exists() {
        return Ok(url.to_string());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let separator = if url.contains('?') { '&' } else { '?' };
    Ok(format!("{url}{separator}mode=rwc"))
}
