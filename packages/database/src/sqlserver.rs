use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use deadpool::managed::{self, Metrics, PoolError, RecycleResult};
use tiberius::{Client, ColumnData, FromSql as _};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt as _};

use crate::{Backend, DatabaseError, DatabaseValue, Engine, POOL_POLICY, QueryOutput};

pub type SqlServerClient = Client<Compat<TcpStream>>;
pub type SqlServerPool = managed::Pool<SqlServerManager>;

/// Opens tiberius clients for a pool.
#[derive(Debug)]
pub struct SqlServerManager {
    config: tiberius::Config,
}

impl SqlServerManager {
    #[must_use]
    pub const fn new(config: tiberius::Config) -> Self {
        Self { config }
    }
}

impl managed::Manager for SqlServerManager {
    type Type = SqlServerClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        log::debug!("Opening sqlserver connection to {}", self.config.get_addr());
        let socket = TcpStream::connect(self.config.get_addr()).await?;
        socket.set_nodelay(true)?;
        Client::connect(self.config.clone(), socket.compat_write()).await
    }

    async fn recycle(&self, client: &mut Self::Type, _: &Metrics) -> RecycleResult<Self::Error> {
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }
}

/// # Errors
///
/// * If the pool cannot be built
pub fn build_pool(config: tiberius::Config) -> Result<SqlServerPool, managed::BuildError> {
    managed::Pool::builder(SqlServerManager::new(config))
        .max_size(POOL_POLICY.max_open as usize)
        .build()
}

impl From<PoolError<tiberius::error::Error>> for DatabaseError {
    fn from(value: PoolError<tiberius::error::Error>) -> Self {
        match value {
            PoolError::Backend(e) => Self::SqlServer(e),
            other => Self::SqlServerPool(other.to_string()),
        }
    }
}

pub struct SqlServerBackend {
    pool: SqlServerPool,
    connection: Option<managed::Object<SqlServerManager>>,
}

impl fmt::Debug for SqlServerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlServerBackend")
            .field("pool", &self.pool.status())
            .field("pinned", &self.connection.is_some())
            .finish()
    }
}

impl SqlServerBackend {
    #[must_use]
    pub const fn new(pool: SqlServerPool) -> Self {
        Self {
            pool,
            connection: None,
        }
    }

    /// Returns the client pinned to this backend, taking it from the pool on first use.
    ///
    /// # Errors
    ///
    /// Will return `Err` if cannot get a connection
    pub async fn get_connection(&mut self) -> Result<&mut SqlServerClient, DatabaseError> {
        let connection = if let Some(connection) = self.connection.take() {
            log::trace!("Returning existing connection from sqlserver db pool");
            connection
        } else {
            log::debug!("Fetching new connection from sqlserver db pool");
            self.pool.get().await?
        };

        Ok(&mut **self.connection.insert(connection))
    }
}

#[async_trait]
impl Backend for SqlServerBackend {
    fn engine(&self) -> Engine {
        Engine::SqlServer
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        let client = self.get_connection().await?;
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    async fn query(&mut self, statement: &str) -> Result<QueryOutput, DatabaseError> {
        let client = self.get_connection().await?;

        match select(client, statement).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if matches!(e, tiberius::error::Error::Io { .. }) {
                    log::debug!("Dropping broken sqlserver connection");
                    self.connection.take();
                }
                Err(e.into())
            }
        }
    }

    /// TDS offers no way to cancel from outside the stream that was
    /// dropped mid-response, so the pinned client is closed instead.
    async fn interrupt(&mut self) {
        if let Some(connection) = self.connection.take() {
            log::debug!("Discarding sqlserver connection with an unfinished response");
            drop(managed::Object::take(connection));
        }
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        if let Some(connection) = self.connection.take() {
            managed::Object::take(connection).close().await?;
        }
        self.pool.close();
        Ok(())
    }
}

async fn select(
    client: &mut SqlServerClient,
    statement: &str,
) -> Result<QueryOutput, tiberius::error::Error> {
    let mut stream = client.simple_query(statement.to_string()).await?;

    let columns = stream
        .columns()
        .await?
        .map(|columns| {
            columns
                .iter()
                .map(|column| column.name().to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let rows = stream.into_first_result().await?;

    Ok(QueryOutput {
        columns,
        rows: rows
            .iter()
            .map(|row| row.cells().map(|(_, data)| column_value(data)).collect())
            .collect::<Result<_, _>>()?,
    })
}

/// # Errors
///
/// * If a temporal value cannot be converted
pub fn column_value(data: &ColumnData<'static>) -> Result<DatabaseValue, tiberius::error::Error> {
    use DatabaseValue as V;

    Ok(match data {
        ColumnData::U8(value) => value.map_or(V::Null, |x| V::Int64(x.into())),
        ColumnData::I16(value) => value.map_or(V::Null, |x| V::Int64(x.into())),
        ColumnData::I32(value) => value.map_or(V::Null, |x| V::Int64(x.into())),
        ColumnData::I64(value) => value.map_or(V::Null, V::Int64),
        ColumnData::F32(value) => value.map_or(V::Null, V::Real32),
        ColumnData::F64(value) => value.map_or(V::Null, V::Real64),
        ColumnData::Bit(value) => value.map_or(V::Null, V::Bool),
        ColumnData::String(value) => value
            .as_ref()
            .map_or(V::Null, |x| V::String(x.to_string())),
        ColumnData::Guid(value) => value.map_or(V::Null, V::Uuid),
        ColumnData::Binary(value) => value.as_ref().map_or(V::Null, |x| V::Bytes(x.to_vec())),
        ColumnData::Numeric(value) => value
            .as_ref()
            .map_or(V::Null, |x| V::Numeric(x.to_string())),
        ColumnData::Xml(value) => value
            .as_ref()
            .map_or(V::Null, |x| V::String(x.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)?.map_or(V::Null, V::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map_or(V::Null, V::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map_or(V::Null, V::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(data)?.map_or(V::Null, V::DateTimeOffset)
        }
    })
}
