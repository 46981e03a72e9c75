use async_trait::async_trait;
use sqlx::{
    Column as _, Connection as _, Executor as _, PgConnection, PgPool, Postgres, Row as _,
    Statement as _, TypeInfo as _, Value as _, ValueRef as _,
    pool::PoolConnection,
    postgres::{PgRow, PgValueFormat, PgValueRef},
};

use crate::{Backend, DatabaseError, DatabaseValue, Engine, QueryOutput};

#[derive(Debug)]
pub struct PostgresSqlxBackend {
    pool: PgPool,
    connection: Option<PoolConnection<Postgres>>,
    backend_pid: Option<i32>,
}

impl PostgresSqlxBackend {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            connection: None,
            backend_pid: None,
        }
    }

    /// Returns the connection pinned to this backend, acquiring it on first use.
    ///
    /// # Errors
    ///
    /// Will return `Err` if cannot get a connection
    pub async fn get_connection(&mut self) -> Result<&mut PoolConnection<Postgres>, sqlx::Error> {
        let connection = if let Some(connection) = self.connection.take() {
            log::trace!("Returning existing connection from postgres db pool");
            connection
        } else {
            log::debug!("Fetching new connection from postgres db pool");
            let mut connection = self.pool.acquire().await?;
            let pid = sqlx::query_scalar("SELECT pg_backend_pid()")
                .fetch_one(&mut *connection)
                .await?;
            log::trace!("Pinned postgres backend {pid}");
            self.backend_pid = Some(pid);
            connection
        };

        Ok(self.connection.insert(connection))
    }

    async fn release_connection(&mut self) {
        self.backend_pid = None;
        if let Some(connection) = self.connection.take() {
            log::debug!("Closing broken postgres connection");
            if let Err(e) = connection.close().await {
                log::debug!("Failed to close postgres connection: {e:?}");
            }
        }
    }

    fn discard_connection(&mut self) {
        self.backend_pid = None;
        if let Some(connection) = self.connection.take() {
            drop(connection.detach());
        }
    }
}

#[async_trait]
impl Backend for PostgresSqlxBackend {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        self.get_connection().await?.ping().await?;
        Ok(())
    }

    async fn query(&mut self, statement: &str) -> Result<QueryOutput, DatabaseError> {
        let connection = self.get_connection().await?;

        match select(connection, statement).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if matches!(&e, DatabaseError::Sqlx(e) if super::is_connection_error(e)) {
                    self.release_connection().await;
                }
                Err(e)
            }
        }
    }

    /// Cancels the pinned backend's statement from a second pool connection.
    async fn interrupt(&mut self) {
        let Some(pid) = self.backend_pid else {
            return;
        };
        log::debug!("Cancelling statement on postgres backend {pid}");

        match tokio::time::timeout(super::CANCEL_TIMEOUT, cancel_backend(&self.pool, pid)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("Failed to cancel postgres backend {pid}: {e:?}, discarding connection");
                self.discard_connection();
            }
            Err(_) => {
                log::warn!("Cancelling postgres backend {pid} timed out, discarding connection");
                self.discard_connection();
            }
        }
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        self.backend_pid = None;
        self.connection.take();
        self.pool.close().await;
        Ok(())
    }
}

async fn cancel_backend(pool: &PgPool, pid: i32) -> Result<(), sqlx::Error> {
    let mut connection = pool.acquire().await?;
    sqlx::query("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .execute(&mut *connection)
        .await?;
    Ok(())
}

/// Rows are fetched through the simple query protocol, so every value
/// arrives in the server's text format.
async fn select(
    connection: &mut PgConnection,
    statement: &str,
) -> Result<QueryOutput, DatabaseError> {
    // Several statements separated by `;` cannot be prepared as one.
    let columns = match connection.prepare(statement).await {
        Ok(prepared) => Some(
            prepared
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect::<Vec<_>>(),
        ),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("42601") => {
            log::debug!("select: prepare failed ({e}), taking columns from the first row");
            None
        }
        Err(e) => return Err(e.into()),
    };

    super::first_result_set(columns, connection.fetch_many(statement), from_row).await
}

/// # Errors
///
/// * If the value cannot be decoded as its reported type
/// * If a binary-format value has a type without a mapping
pub fn column_value(value: &PgValueRef<'_>) -> Result<DatabaseValue, DatabaseError> {
    if value.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let owned = sqlx::ValueRef::to_owned(value);
    Ok(match value.type_info().name() {
        "BOOL" => DatabaseValue::Bool(owned.try_decode()?),
        "INT2" => DatabaseValue::Int64(owned.try_decode::<i16>()?.into()),
        "INT4" => DatabaseValue::Int64(owned.try_decode::<i32>()?.into()),
        "INT8" => DatabaseValue::Int64(owned.try_decode()?),
        "OID" => DatabaseValue::UInt64(owned.try_decode::<sqlx::postgres::types::Oid>()?.0.into()),
        "FLOAT4" => DatabaseValue::Real32(owned.try_decode()?),
        "FLOAT8" => DatabaseValue::Real64(owned.try_decode()?),
        "NUMERIC" => DatabaseValue::Numeric(server_text(value)?),
        "TEXT" | "VARCHAR" | "CHAR" | "\"CHAR\"" | "NAME" | "UNKNOWN" | "INTERVAL" | "TIMETZ"
        | "INET" | "CIDR" | "MACADDR" | "MONEY" => DatabaseValue::String(server_text(value)?),
        "BYTEA" => DatabaseValue::Bytes(owned.try_decode()?),
        "UUID" => DatabaseValue::Uuid(owned.try_decode()?),
        "JSON" | "JSONB" => DatabaseValue::Json(owned.try_decode()?),
        // `infinity` and BC dates have no chrono form
        "DATE" => owned
            .try_decode()
            .map_or_else(|_| text_fallback(value), |x| Ok(DatabaseValue::Date(x)))?,
        "TIME" => owned
            .try_decode()
            .map_or_else(|_| text_fallback(value), |x| Ok(DatabaseValue::Time(x)))?,
        "TIMESTAMP" => owned
            .try_decode()
            .map_or_else(|_| text_fallback(value), |x| Ok(DatabaseValue::DateTime(x)))?,
        "TIMESTAMPTZ" => owned
            .try_decode::<chrono::DateTime<chrono::FixedOffset>>()
            .map_or_else(
                |_| text_fallback(value),
                |x| Ok(DatabaseValue::DateTimeOffset(x)),
            )?,
        name if value.format() == PgValueFormat::Text => {
            log::trace!("column_value: rendering {name} as server text");
            DatabaseValue::String(server_text(value)?)
        }
        name => return Err(DatabaseError::UnsupportedDataType(name.to_string())),
    })
}

fn server_text(value: &PgValueRef<'_>) -> Result<String, sqlx::Error> {
    Ok(value.as_str().map_err(sqlx::Error::Decode)?.to_string())
}

fn text_fallback(value: &PgValueRef<'_>) -> Result<DatabaseValue, sqlx::Error> {
    if value.format() == PgValueFormat::Text {
        server_text(value).map(DatabaseValue::String)
    } else {
        Err(sqlx::Error::Decode(
            format!("cannot decode binary {}", value.type_info().name()).into(),
        ))
    }
}

fn from_row(row: &PgRow) -> Result<Vec<DatabaseValue>, DatabaseError> {
    (0..row.len())
        .map(|index| column_value(&row.try_get_raw(index)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::BackendSession;

    fn get_postgres_test_url() -> Option<String> {
        std::env::var("POSTGRES_TEST_URL").ok()
    }

    async fn create_session(url: &str) -> BackendSession {
        let pool = PgPool::connect(url).await.expect("Failed to create pool");
        BackendSession::new(Box::new(PostgresSqlxBackend::new(pool)))
    }

    async fn single_row(session: &mut BackendSession, statement: &str) -> Vec<String> {
        let result = session.execute(statement).await;
        assert_eq!(result.error, "", "{statement}");
        assert_eq!(result.rows.len(), 1, "{statement}");
        result.rows[0].values.clone()
    }

    #[test_log::test(tokio::test)]
    async fn renders_common_types() {
        let Some(url) = get_postgres_test_url() else {
            return;
        };
        let mut session = create_session(&url).await;

        let values = single_row(
            &mut session,
            "SELECT NULL::int4 AS n, 42::int4 AS i, true AS flag, 1.5::float8 AS f, \
             12345678901234567890123456789012.5::numeric AS big, \
             'ab'::char(3) AS padded, 'x'::\"char\" AS c, \
             DATE '2024-01-31' AS d, TIME '13:45:00' AS t, \
             TIMESTAMP '2024-01-31 13:45:00' AS ts, '\\xcafe'::bytea AS b",
        )
        .await;

        assert_eq!(
            values,
            vec![
                "<nil>",
                "42",
                "true",
                "1.5",
                "12345678901234567890123456789012.5",
                "ab ",
                "x",
                "2024-01-31",
                "13:45:00",
                "2024-01-31 13:45:00",
                "0xcafe",
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn renders_types_in_server_text() {
        let Some(url) = get_postgres_test_url() else {
            return;
        };
        let mut session = create_session(&url).await;
        assert_eq!(session.execute("SET TIME ZONE 'UTC'").await.error, "");

        let values = single_row(
            &mut session,
            "SELECT INTERVAL '1 day 02:00:00' AS i, '10.0.0.0/8'::cidr AS net, \
             '192.168.0.1'::inet AS addr, TIMESTAMPTZ '2024-01-31 13:45:00+02' AS tz, \
             'infinity'::timestamp AS forever, '{1,2}'::int4[] AS list",
        )
        .await;

        assert_eq!(
            values,
            vec![
                "1 day 02:00:00",
                "10.0.0.0/8",
                "192.168.0.1",
                "2024-01-31 11:45:00 +00:00",
                "infinity",
                "{1,2}",
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn only_first_result_set_is_returned() {
        let Some(url) = get_postgres_test_url() else {
            return;
        };
        let mut session = create_session(&url).await;

        let result = session.execute("SELECT 1 AS a; SELECT 2, 3").await;

        assert_eq!(result.error, "");
        assert_eq!(result.columns, vec!["a"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].values, vec!["1"]);

        let next = single_row(&mut session, "SELECT 4").await;
        assert_eq!(next, vec!["4"]);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn timed_out_statement_is_cancelled() {
        let Some(url) = get_postgres_test_url() else {
            return;
        };
        let mut session = create_session(&url)
            .await
            .with_query_timeout(Duration::from_millis(500));
        let pid = single_row(&mut session, "SELECT pg_backend_pid()").await;

        let slow = session.execute("SELECT pg_sleep(30)").await;
        assert!(slow.error.contains("timed out"), "{}", slow.error);

        let next = tokio::time::timeout(Duration::from_secs(5), single_row(&mut session, "SELECT 2"))
            .await
            .unwrap();
        assert_eq!(next, vec!["2"]);
        assert_eq!(single_row(&mut session, "SELECT pg_backend_pid()").await, pid);
    }
}
