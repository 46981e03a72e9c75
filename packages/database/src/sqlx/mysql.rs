use async_trait::async_trait;
use sqlx::{
    Column as _, Connection as _, Executor as _, MySql, MySqlConnection, MySqlPool, Row as _,
    Statement as _, TypeInfo as _, Value as _, ValueRef as _,
    mysql::{MySqlRow, MySqlValue, MySqlValueRef},
    pool::PoolConnection,
};

use crate::{Backend, DatabaseError, DatabaseValue, Engine, QueryOutput};

#[derive(Debug)]
pub struct MySqlSqlxBackend {
    pool: MySqlPool,
    connection: Option<PoolConnection<MySql>>,
    connection_id: Option<u64>,
}

impl MySqlSqlxBackend {
    #[must_use]
    pub const fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            connection: None,
            connection_id: None,
        }
    }

    /// Returns the connection pinned to this backend, acquiring it on first use.
    ///
    /// # Errors
    ///
    /// Will return `Err` if cannot get a connection
    pub async fn get_connection(&mut self) -> Result<&mut PoolConnection<MySql>, sqlx::Error> {
        let connection = if let Some(connection) = self.connection.take() {
            log::trace!("Returning existing connection from mysql db pool");
            connection
        } else {
            log::debug!("Fetching new connection from mysql db pool");
            let mut connection = self.pool.acquire().await?;
            let id = sqlx::query_scalar("SELECT CONNECTION_ID()")
                .fetch_one(&mut *connection)
                .await?;
            log::trace!("Pinned mysql connection {id}");
            self.connection_id = Some(id);
            connection
        };

        Ok(self.connection.insert(connection))
    }

    async fn release_connection(&mut self) {
        self.connection_id = None;
        if let Some(connection) = self.connection.take() {
            log::debug!("Closing broken mysql connection");
            if let Err(e) = connection.close().await {
                log::debug!("Failed to close mysql connection: {e:?}");
            }
        }
    }

    fn discard_connection(&mut self) {
        self.connection_id = None;
        if let Some(connection) = self.connection.take() {
            drop(connection.detach());
        }
    }
}

#[async_trait]
impl Backend for MySqlSqlxBackend {
    fn engine(&self) -> Engine {
        Engine::MySql
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

    /// Kills the pinned connection's statement from a second pool connection.
    async fn interrupt(&mut self) {
        let Some(id) = self.connection_id else {
            return;
        };
        log::debug!("Killing statement on mysql connection {id}");

        match tokio::time::timeout(super::CANCEL_TIMEOUT, kill_query(&self.pool, id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("Failed to kill mysql query on {id}: {e:?}, discarding connection");
                self.discard_connection();
            }
            Err(_) => {
                log::warn!("Killing mysql query on {id} timed out, discarding connection");
                self.discard_connection();
            }
        }
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        self.connection_id = None;
        self.connection.take();
        self.pool.close().await;
        Ok(())
    }
}

async fn kill_query(pool: &MySqlPool, id: u64) -> Result<(), sqlx::Error> {
    let mut connection = pool.acquire().await?;
    let kill = format!("KILL QUERY {id}");
    sqlx::Executor::execute(&mut *connection, sqlx::raw_sql(&kill)).await?;
    Ok(())
}

/// Rows are fetched through the text protocol, which also accepts several
/// statements at once.
async fn select(
    connection: &mut MySqlConnection,
    statement: &str,
) -> Result<QueryOutput, DatabaseError> {
    // Statements such as `USE` or `LOCK TABLES` cannot be prepared; their
    // columns come from the first row instead.
    let columns = match connection.prepare(statement).await {
        Ok(prepared) => Some(
            prepared
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect::<Vec<_>>(),
        ),
        Err(sqlx::Error::Database(e)) => {
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
pub fn column_value(value: &MySqlValueRef<'_>) -> Result<DatabaseValue, sqlx::Error> {
    if value.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let owned = sqlx::ValueRef::to_owned(value);
    match value.type_info().name() {
        "BOOLEAN" => Ok(DatabaseValue::Bool(owned.try_decode()?)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Ok(DatabaseValue::Int64(owned.try_decode()?))
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => Ok(DatabaseValue::UInt64(owned.try_decode()?)),
        "YEAR" => Ok(DatabaseValue::UInt64(
            owned.try_decode_unchecked::<u16>()?.into(),
        )),
        "FLOAT" => Ok(DatabaseValue::Real32(owned.try_decode()?)),
        "DOUBLE" => Ok(DatabaseValue::Real64(owned.try_decode()?)),
        "DECIMAL" => Ok(DatabaseValue::Numeric(owned.try_decode_unchecked()?)),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            Ok(DatabaseValue::String(owned.try_decode()?))
        }
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => Ok(DatabaseValue::Bytes(owned.try_decode_unchecked()?)),
        "JSON" => Ok(DatabaseValue::Json(owned.try_decode()?)),
        "DATE" => owned
            .try_decode()
            .map(DatabaseValue::Date)
            .or_else(|_| text(&owned)),
        // TIME also holds durations outside of a day, which fall back to text.
        "TIME" => owned
            .try_decode()
            .map(DatabaseValue::Time)
            .or_else(|_| text(&owned)),
        "DATETIME" | "TIMESTAMP" => owned
            .try_decode()
            .map(DatabaseValue::DateTime)
            .or_else(|_| text(&owned)),
        // text protocol rows carry every other type as its server rendering
        _ => text(&owned),
    }
}

fn text(owned: &MySqlValue) -> Result<DatabaseValue, sqlx::Error> {
    owned
        .try_decode_unchecked::<String>()
        .map(DatabaseValue::String)
        .or_else(|_| owned.try_decode_unchecked::<Vec<u8>>().map(DatabaseValue::Bytes))
}

fn from_row(row: &MySqlRow) -> Result<Vec<DatabaseValue>, DatabaseError> {
    (0..row.len())
        .map(|index| Ok(column_value(&row.try_get_raw(index)?)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::BackendSession;

    fn get_mysql_test_url() -> Option<String> {
        std::env::var("MYSQL_TEST_URL").ok()
    }

    async fn create_session(url: &str) -> BackendSession {
        let pool = MySqlPool::connect(url).await.expect("Failed to create pool");
        BackendSession::new(Box::new(MySqlSqlxBackend::new(pool)))
    }

    async fn single_row(session: &mut BackendSession, statement: &str) -> Vec<String> {
        let result = session.execute(statement).await;
        assert_eq!(result.error, "", "{statement}");
        assert_eq!(result.rows.len(), 1, "{statement}");
        result.rows[0].values.clone()
    }

    #[test_log::test(tokio::test)]
    async fn renders_common_types() {
        let Some(url) = get_mysql_test_url() else {
            return;
        };
        let mut session = create_session(&url).await;

        let values = single_row(
            &mut session,
            "SELECT NULL AS n, 42 AS i, CAST(18446744073709551615 AS UNSIGNED) AS u, \
             CAST('12345678901234567890123456789012.5' AS DECIMAL(40, 1)) AS big, \
             DATE '2024-01-31' AS d, TIME '13:45:00' AS t, \
             TIMESTAMP '2024-01-31 13:45:00' AS ts, x'CAFE' AS b",
        )
        .await;

        assert_eq!(
            values,
            vec![
                "<nil>",
                "42",
                "18446744073709551615",
                "12345678901234567890123456789012.5",
                "2024-01-31",
                "13:45:00",
                "2024-01-31 13:45:00",
                "0xcafe",
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn renders_char_columns_and_long_times() {
        let Some(url) = get_mysql_test_url() else {
            return;
        };
        let mut session = create_session(&url).await;
        let created = session
            .execute("CREATE TEMPORARY TABLE repl_chars (c CHAR(3), t TIME, y YEAR)")
            .await;
        assert_eq!(created.error, "");
        let inserted = session
            .execute("INSERT INTO repl_chars VALUES ('ab', '36:00:00', 2024)")
            .await;
        assert_eq!(inserted.error, "");

        let values = single_row(&mut session, "SELECT c, t, y FROM repl_chars").await;

        assert_eq!(values, vec!["ab", "36:00:00", "2024"]);
    }

    #[test_log::test(tokio::test)]
    async fn only_first_result_set_is_returned() {
        let Some(url) = get_mysql_test_url() else {
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
    async fn timed_out_statement_is_killed() {
        let Some(url) = get_mysql_test_url() else {
            return;
        };
        let mut session = create_session(&url)
            .await
            .with_query_timeout(Duration::from_millis(500));
        let id = single_row(&mut session, "SELECT CONNECTION_ID()").await;

        let slow = session.execute("SELECT SLEEP(30)").await;
        assert!(slow.error.contains("timed out"), "{}", slow.error);

        let next = tokio::time::timeout(Duration::from_secs(5), single_row(&mut session, "SELECT 2"))
            .await
            .unwrap();
        assert_eq!(next, vec!["2"]);
        assert_eq!(single_row(&mut session, "SELECT CONNECTION_ID()").await, id);
    }
}
