#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod dsn;

use sqlrepl_database::{Backend, BackendSession, DatabaseError, Engine, EngineParseError};
use thiserror::Error;

pub use dsn::DsnError;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    InvalidEngine(#[from] EngineParseError),
    #[error(transparent)]
    Dsn(#[from] DsnError),
    #[error("{0} support is not enabled")]
    EngineNotEnabled(Engine),
    #[cfg(any(feature = "mysql", feature = "postgres", feature = "sqlite"))]
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[cfg(feature = "sqlserver")]
    #[error(transparent)]
    SqlServer(#[from] tiberius::error::Error),
    #[cfg(feature = "sqlserver")]
    #[error(transparent)]
    SqlServerPool(#[from] deadpool::managed::BuildError),
    #[cfg(feature = "oracle")]
    #[error(transparent)]
    Oracle(#[from] oracle::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("Failed to ping database: {0}")]
    Ping(#[source] DatabaseError),
}

/// Resolves `engine_name` and connects to it.
///
/// # Errors
///
/// * If the engine name is not one of the supported engines
/// * If the connection cannot be established
pub async fn connect(
    engine_name: &str,
    connection_string: &str,
) -> Result<BackendSession, ConnectError> {
    connect_engine(engine_name.parse()?, connection_string).await
}

/// Opens a pool with the engine's pool policy, pins one connection from it,
/// checks it is alive and runs the engine's session init hook.
///
/// # Errors
///
/// * If the connection string is invalid
/// * If the pool cannot be created
/// * If the liveness ping fails
pub async fn connect_engine(
    engine: Engine,
    connection_string: &str,
) -> Result<BackendSession, ConnectError> {
    log::debug!("connect_engine: opening {engine} backend");

    let mut session = BackendSession::new(open_backend(engine, connection_string).await?);

    session.ping().await.map_err(ConnectError::Ping)?;

    // A failing init hook leaves a usable session without its extras.
    if let Err(e) = session.init().await {
        log::warn!("connect_engine: {engine} session init failed: {e}");
    }

    log::info!("Successfully connected to the {engine} database");

    Ok(session)
}

#[allow(clippy::unused_async)]
async fn open_backend(
    engine: Engine,
    connection_string: &str,
) -> Result<Box<dyn Backend>, ConnectError> {
    match engine {
        #[cfg(feature = "sqlite")]
        Engine::Sqlite => init_sqlite_sqlx(connection_string).await,
        #[cfg(feature = "mysql")]
        Engine::MySql => init_mysql_sqlx(connection_string).await,
        #[cfg(feature = "postgres")]
        Engine::Postgres => init_postgres_sqlx(connection_string).await,
        #[cfg(feature = "sqlserver")]
        Engine::SqlServer => init_sqlserver(connection_string),
        #[cfg(feature = "oracle")]
        Engine::Oracle => init_oracle(connection_string).await,
        #[allow(unreachable_patterns)]
        _ => {
            let _ = connection_string;
            Err(ConnectError::EngineNotEnabled(engine))
        }
    }
}

/// # Errors
///
/// * If the database cannot be opened
#[cfg(feature = "sqlite")]
pub async fn init_sqlite_sqlx(connection_string: &str) -> Result<Box<dyn Backend>, ConnectError> {
    use std::str::FromStr as _;

    use sqlrepl_database::{POOL_POLICY, sqlx::sqlite::SqliteSqlxBackend};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use crate::dsn::SqliteLocation;

    let connect_options = match dsn::sqlite_location(connection_string) {
        SqliteLocation::Memory => SqliteConnectOptions::new().in_memory(true),
        SqliteLocation::Url(url) => SqliteConnectOptions::from_str(&url)?,
        SqliteLocation::Path(path) => SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_POLICY.max_open)
        .min_connections(0)
        .connect_with(connect_options)
        .await?;

    Ok(Box::new(SqliteSqlxBackend::new(pool)))
}

/// # Errors
///
/// * If the connection string is invalid or the server cannot be reached
#[cfg(feature = "mysql")]
pub async fn init_mysql_sqlx(connection_string: &str) -> Result<Box<dyn Backend>, ConnectError> {
    use std::str::FromStr as _;

    use sqlrepl_database::{POOL_POLICY, sqlx::mysql::MySqlSqlxBackend};
    use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};

    let connect_options = MySqlConnectOptions::from_str(&dsn::mysql_url(connection_string)?)?;

    let pool = MySqlPoolOptions::new()
        .max_connections(POOL_POLICY.max_open)
        .min_connections(0)
        .connect_with(connect_options)
        .await?;

    Ok(Box::new(MySqlSqlxBackend::new(pool)))
}

/// # Errors
///
/// * If the connection string is invalid or the server cannot be reached
#[cfg(feature = "postgres")]
pub async fn init_postgres_sqlx(
    connection_string: &str,
) -> Result<Box<dyn Backend>, ConnectError> {
    use std::str::FromStr as _;

    use sqlrepl_database::{POOL_POLICY, sqlx::postgres::PostgresSqlxBackend};
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    let connect_options = PgConnectOptions::from_str(&dsn::postgres_url(connection_string)?)?;

    let pool = PgPoolOptions::new()
        .max_connections(POOL_POLICY.max_open)
        .min_connections(0)
        .connect_with(connect_options)
        .await?;

    Ok(Box::new(PostgresSqlxBackend::new(pool)))
}

/// Builds the pool without connecting. The first connection is opened by
/// the liveness ping.
///
/// # Errors
///
/// * If the connection string is invalid
#[cfg(feature = "sqlserver")]
pub fn init_sqlserver(connection_string: &str) -> Result<Box<dyn Backend>, ConnectError> {
    use sqlrepl_database::sqlserver::{SqlServerBackend, build_pool};

    use crate::dsn::SqlServerDsn;

    let config = match dsn::sqlserver_dsn(connection_string)? {
        SqlServerDsn::Ado(ado) => tiberius::Config::from_ado_string(&ado)?,
        SqlServerDsn::Jdbc(jdbc) => tiberius::Config::from_jdbc_string(&jdbc)?,
    };

    Ok(Box::new(SqlServerBackend::new(build_pool(config)?)))
}

/// # Errors
///
/// * If the connection string is invalid or the pool cannot be created
#[cfg(feature = "oracle")]
pub async fn init_oracle(connection_string: &str) -> Result<Box<dyn Backend>, ConnectError> {
    use sqlrepl_database::oracle::{OracleBackend, build_pool};

    let credentials = dsn::oracle_credentials(connection_string)?;

    let pool = tokio::task::spawn_blocking(move || {
        build_pool(
            &credentials.username,
            &credentials.password,
            &credentials.connect_string,
        )
    })
    .await??;

    Ok(Box::new(OracleBackend::new(pool)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn unknown_engine_is_rejected_before_connecting() {
        let result = connect("nosql", "x").await;

        assert!(matches!(result, Err(ConnectError::InvalidEngine(_))));
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test(tokio::test)]
    async fn connects_to_in_memory_sqlite() {
        let mut session = connect("SQLite", ":memory:").await.unwrap();

        assert_eq!(session.engine(), Engine::Sqlite);

        let result = session.execute("SELECT 1;").await;

        assert_eq!(result.error, "");
        assert_eq!(result.rows[0].values, vec!["1"]);

        session.close().await.unwrap();
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test(tokio::test)]
    async fn creates_missing_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.db");

        let session = connect("sqlite", path.to_str().unwrap()).await.unwrap();
        session.close().await.unwrap();

        assert!(path.exists());
    }

    #[cfg(feature = "sqlite")]
    #[test_log::test(tokio::test)]
    async fn unopenable_sqlite_path_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("db.sqlite");

        assert!(connect("sqlite", path.to_str().unwrap()).await.is_err());
    }

    #[cfg(feature = "mysql")]
    #[test_log::test(tokio::test)]
    async fn malformed_mysql_dsn_fails_before_connecting() {
        let result = connect("mysql", "not a dsn").await;

        assert!(matches!(result, Err(ConnectError::Dsn(_))));
    }
}
