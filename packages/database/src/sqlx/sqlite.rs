use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use futures::{Stream, StreamExt as _};
use sqlx::{
    Column as _, Connection as _, Executor as _, Row as _, Sqlite, SqliteConnection, SqlitePool,
    Statement as _, TypeInfo as _, Value as _, ValueRef as _,
    pool::PoolConnection,
    sqlite::{SqliteRow, SqliteValue, SqliteValueRef},
};

use crate::{Backend, DatabaseError, DatabaseValue, Engine, QueryOutput};

/// Virtual machine instructions between checks of the interrupt flag.
const PROGRESS_CHECK_OPS: i32 = 1_000;

#[derive(Debug)]
pub struct SqliteSqlxBackend {
    pool: SqlitePool,
    connection: Option<PoolConnection<Sqlite>>,
    interrupted: Arc<AtomicBool>,
}

impl SqliteSqlxBackend {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            connection: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the connection pinned to this backend, acquiring it on first use.
    ///
    /// # Errors
    ///
    /// Will return `Err` if cannot get a connection
    pub async fn get_connection(&mut self) -> Result<&mut PoolConnection<Sqlite>, sqlx::Error> {
        let connection = if let Some(connection) = self.connection.take() {
            log::trace!("Returning existing connection from sqlite db pool");
            connection
        } else {
            log::debug!("Fetching new connection from sqlite db pool");
            let mut connection = self.pool.acquire().await?;
            let interrupted = self.interrupted.clone();
            connection
                .lock_handle()
                .await?
                .set_progress_handler(PROGRESS_CHECK_OPS, move || {
                    !interrupted.load(Ordering::SeqCst)
                });
            connection
        };

        Ok(self.connection.insert(connection))
    }

    async fn release_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            log::debug!("Closing broken sqlite connection");
            if let Err(e) = connection.close().await {
                log::debug!("Failed to close sqlite connection: {e:?}");
            }
        }
    }
}

#[async_trait]
impl Backend for SqliteSqlxBackend {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        self.get_connection().await?.ping().await?;
        Ok(())
    }

    async fn query(&mut self, statement: &str) -> Result<QueryOutput, DatabaseError> {
        self.interrupted.store(false, Ordering::SeqCst);
        let connection = self.get_connection().await?;

        match select(connection, statement).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if super::is_connection_error(&e) {
                    self.release_connection().await;
                }
                Err(e.into())
            }
        }
    }

    /// Raises the flag polled by the connection's progress handler, then
    /// waits for the connection worker to finish the aborted statement.
    async fn interrupt(&mut self) {
        log::debug!("Interrupting sqlite statement");
        self.interrupted.store(true, Ordering::SeqCst);

        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        let idle = matches!(
            tokio::time::timeout(super::CANCEL_TIMEOUT, connection.lock_handle()).await,
            Ok(Ok(_))
        );
        if !idle {
            log::warn!("Sqlite statement did not stop after interrupt, discarding connection");
            if let Some(connection) = self.connection.take() {
                drop(connection.detach());
            }
        }
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        self.connection.take();
        self.pool.close().await;
        Ok(())
    }
}

async fn select(
    connection: &mut SqliteConnection,
    statement: &str,
) -> Result<QueryOutput, sqlx::Error> {
    let prepared = connection.prepare(statement).await?;

    let columns = prepared
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect::<Vec<_>>();

    let rows = to_rows(prepared.query().fetch(connection)).await?;

    Ok(QueryOutput { columns, rows })
}

async fn to_rows<'a>(
    mut rows: Pin<Box<dyn Stream<Item = Result<SqliteRow, sqlx::Error>> + Send + 'a>>,
) -> Result<Vec<Vec<DatabaseValue>>, sqlx::Error> {
    let mut results = vec![];

    while let Some(row) = rows.next().await.transpose()? {
        results.push(from_row(&row)?);
    }

    log::trace!(
        "Got {} row{}",
        results.len(),
        if results.len() == 1 { "" } else { "s" }
    );

    Ok(results)
}

/// # Errors
///
/// * If the value cannot be decoded as its reported type
pub fn column_value(value: &SqliteValueRef<'_>) -> Result<DatabaseValue, sqlx::Error> {
    if value.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let owned = sqlx::ValueRef::to_owned(value);
    match value.type_info().name() {
        "BOOLEAN" | "BOOL" => Ok(DatabaseValue::Bool(owned.try_decode()?)),
        "INTEGER" | "INT" | "BIGINT" | "INT8" => Ok(DatabaseValue::Int64(owned.try_decode()?)),
        "REAL" | "FLOAT" | "DOUBLE" => Ok(DatabaseValue::Real64(owned.try_decode()?)),
        "TEXT" => Ok(DatabaseValue::String(owned.try_decode()?)),
        "BLOB" => Ok(DatabaseValue::Bytes(owned.try_decode()?)),
        "DATETIME" => owned
            .try_decode()
            .map(DatabaseValue::DateTime)
            .or_else(|_| text(&owned)),
        "DATE" => owned
            .try_decode()
            .map(DatabaseValue::Date)
            .or_else(|_| text(&owned)),
        "TIME" => owned
            .try_decode()
            .map(DatabaseValue::Time)
            .or_else(|_| text(&owned)),
        _ => text(&owned),
    }
}

fn text(owned: &SqliteValue) -> Result<DatabaseValue, sqlx::Error> {
    owned
        .try_decode_unchecked::<String>()
        .map(DatabaseValue::String)
        .or_else(|_| owned.try_decode_unchecked::<Vec<u8>>().map(DatabaseValue::Bytes))
}

fn from_row(row: &SqliteRow) -> Result<Vec<DatabaseValue>, sqlx::Error> {
    (0..row.len())
        .map(|index| column_value(&row.try_get_raw(index)?))
        .collect()
}
