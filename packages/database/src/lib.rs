#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

#[cfg(feature = "oracle")]
pub mod oracle;
#[cfg(feature = "sqlserver")]
pub mod sqlserver;
#[cfg(feature = "sqlx")]
pub mod sqlx;

mod engine;
mod session;
mod value;

pub use engine::{
    Engine, EngineCapabilities, EngineParseError, POOL_POLICY, PoolPolicy, PostQuery, SessionInit,
    oracle_pre_query,
};
pub use session::{BackendSession, QUERY_TIMEOUT};
pub use value::DatabaseValue;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[cfg(feature = "sqlx")]
    #[error(transparent)]
    Sqlx(#[from] ::sqlx::Error),
    #[cfg(feature = "sqlserver")]
    #[error(transparent)]
    SqlServer(#[from] tiberius::error::Error),
    #[cfg(feature = "sqlserver")]
    #[error("SQL Server pool error: {0}")]
    SqlServerPool(String),
    #[cfg(feature = "oracle")]
    #[error(transparent)]
    Oracle(#[from] ::oracle::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("Query timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("Row has {actual} values but the result has {expected} columns")]
    RowLength { expected: usize, actual: usize },
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),
    #[error("{engine} does not support {operation}")]
    Unsupported {
        engine: Engine,
        operation: &'static str,
    },
    #[error("Session is closed")]
    Closed,
}

/// Everything a statement returned, before rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DatabaseValue>>,
}

/// A live connection to one engine. A session owns exactly one backend and
/// runs one statement on it at a time.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn engine(&self) -> Engine;

    /// # Errors
    ///
    /// * If the backend is not reachable
    async fn ping(&mut self) -> Result<(), DatabaseError>;

    /// Runs one statement and collects every row it produced.
    ///
    /// # Errors
    ///
    /// * If the statement fails or a value cannot be decoded
    async fn query(&mut self, statement: &str) -> Result<QueryOutput, DatabaseError>;

    /// # Errors
    ///
    /// * If the engine has no server output buffer or enabling it fails
    async fn enable_server_output(&mut self) -> Result<(), DatabaseError> {
        Err(DatabaseError::Unsupported {
            engine: self.engine(),
            operation: "server output",
        })
    }

    /// Reads and clears the server output buffer.
    ///
    /// # Errors
    ///
    /// * If the engine has no server output buffer or reading it fails
    async fn drain_server_output(&mut self) -> Result<String, DatabaseError> {
        Err(DatabaseError::Unsupported {
            engine: self.engine(),
            operation: "server output",
        })
    }

    /// Stops the statement that exceeded [`QUERY_TIMEOUT`]. Its future has
    /// already been dropped. Afterwards the backend must be able to run the
    /// next statement; when the server cannot be told to stop, the pinned
    /// connection is discarded instead.
    async fn interrupt(&mut self);

    /// # Errors
    ///
    /// * If the connection fails to shut down cleanly
    async fn close(&mut self) -> Result<(), DatabaseError>;
}
