use std::path::Path;
use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection};

use crate::config::{DatabaseConfig, DeferredConfig};
use deferred_core::{DeferredError, DeferredResult};

/// Opens a relational connection suitable for `process`.
///
/// Staging relations are temporary tables and only exist on the session that
/// created them, so the pool is capped at a single connection.
pub async fn connect_relational(
    config: &DeferredConfig,
    base_dir: &Path,
) -> DeferredResult<DatabaseConnection> {
    let url = build_connection_url(config, base_dir)?;
    let mut options = ConnectOptions::new(url);
    options.max_connections(1);
    options.min_connections(1);
    if let Some(pool) = &config.pool {
        if let Some(timeout_ms) = pool.connect_timeout_ms {
            options.connect_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(timeout_ms) = pool.acquire_timeout_ms {
            options.acquire_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(timeout_ms) = pool.idle_timeout_ms {
            options.idle_timeout(Duration::from_millis(timeout_ms));
        }
    }
    let conn = Database::connect(options).await?;
    log::info!(
        "deferred: relational session opened ({})",
        config.backend_name().unwrap_or("unknown")
    );
    Ok(conn)
}

pub(crate) fn ensure_single_session(conn: &DatabaseConnection) -> DeferredResult<()> {
    let max = match conn.get_database_backend() {
        DatabaseBackend::Sqlite => conn
            .get_sqlite_connection_pool()
            .options()
            .get_max_connections(),
        DatabaseBackend::Postgres => conn
            .get_postgres_connection_pool()
            .options()
            .get_max_connections(),
        DatabaseBackend::MySql => conn
            .get_mysql_connection_pool()
            .options()
            .get_max_connections(),
        _ => 1,
    };
    if max > 1 {
        return Err(DeferredError::configuration(format!(
            "staging relations need a single-connection pool, got up to {max} connections"
        )));
    }
    Ok(())
}

fn build_connection_url(config: &DeferredConfig, base_dir: &Path) -> DeferredResult<String> {
    match &config.database {
        Some(DatabaseConfig::Sqlite { .. }) => {
            let path = config.sqlite_path(base_dir)?;
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        Some(DatabaseConfig::Postgres { url }) => Ok(url.clone()),
        Some(DatabaseConfig::Mysql { url }) => Ok(url.clone()),
        None => Err(DeferredError::configuration(
            "no relational database configured",
        )),
    }
}
