// clustervault/src/backup/precheck.rs
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

use crate::config::ConnectionConfig;
use crate::errors::{AppError, Result};

/// Bound on connect + ping during the liveness check.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

pub fn connect_options(conn: &ConnectionConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new_without_pgpass()
        .host(&conn.host)
        .port(conn.port)
        .username(&conn.user)
        .database(&conn.database)
        .ssl_mode(PgSslMode::Prefer)
        .application_name("clustervault");
    if let Some(password) = &conn.password {
        options = options.password(password);
    }
    options
}

async fn connect(conn: &ConnectionConfig) -> Result<PgConnection> {
    let target = conn.display_url();
    let attempt = async {
        let mut connection = PgConnection::connect_with(&connect_options(conn)).await?;
        connection.ping().await?;
        Ok::<_, sqlx::Error>(connection)
    };

    match timeout(LIVENESS_TIMEOUT, attempt).await {
        Ok(Ok(connection)) => Ok(connection),
        Ok(Err(e)) => Err(AppError::Connection(format!("{}: {}", target, e))),
        Err(_) => Err(AppError::Connection(format!(
            "{}: no response within {} seconds",
            target,
            LIVENESS_TIMEOUT.as_secs()
        ))),
    }
}

/// Interprets the `rolreplication` lookup for `user`.
fn check_replication_privilege(user: &str, rolreplication: Option<bool>) -> Result<()> {
    match rolreplication {
        Some(true) => Ok(()),
        Some(false) => Err(AppError::Privilege(format!(
            "user '{}' does not have REPLICATION permission (run: ALTER ROLE \"{}\" WITH REPLICATION;)",
            user, user
        ))),
        None => Err(AppError::Privilege(format!(
            "role '{}' not found in pg_roles",
            user
        ))),
    }
}

/// Verifies the server is reachable and the user may stream a physical backup.
pub async fn check_connection(conn: &ConnectionConfig) -> Result<()> {
    let mut connection = connect(conn).await?;

    let rolreplication: Option<bool> =
        sqlx::query_scalar("SELECT rolreplication FROM pg_roles WHERE rolname = $1")
            .bind(&conn.user)
            .fetch_optional(&mut connection)
            .await
            .map_err(|e| {
                AppError::Connection(format!("failed to check replication permission: {}", e))
            })?;
    let _ = connection.close().await;

    check_replication_privilege(&conn.user, rolreplication)?;

    info!("✓ Connected to {}:{} as {}", conn.host, conn.port, conn.user);
    info!("✓ User has REPLICATION permission");
    Ok(())
}

fn interpret_size(size: Option<i64>) -> Result<u64> {
    match size {
        Some(bytes) if bytes >= 0 => Ok(bytes as u64),
        _ => Err(AppError::Connection(
            "could not determine database size".to_string(),
        )),
    }
}

/// Sums the on-disk size of every non-template database. Best effort.
pub async fn estimate_cluster_size(conn: &ConnectionConfig) -> Result<u64> {
    let mut connection = connect(conn).await?;
    let size: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(pg_database_size(datname))::bigint FROM pg_database WHERE NOT datistemplate",
    )
    .fetch_one(&mut connection)
    .await
    .map_err(|e| AppError::Connection(format!("size query failed: {}", e)))?;
    let _ = connection.close().await;

    interpret_size(size)
}
