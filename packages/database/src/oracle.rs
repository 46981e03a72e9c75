use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use oracle::{
    Connection, SqlValue,
    pool::{CloseMode, Pool, PoolBuilder},
    sql_type::OracleType,
};

use crate::{Backend, DatabaseError, DatabaseValue, Engine, POOL_POLICY, QUERY_TIMEOUT, QueryOutput};

/// Largest line `DBMS_OUTPUT.GET_LINE` can return.
const SERVER_OUTPUT_LINE_LEN: u32 = 32767;

/// Bound on delivering a break to a timed-out statement.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// # Errors
///
/// * If the pool cannot be created
pub fn build_pool(username: &str, password: &str, connect_string: &str) -> Result<Pool, oracle::Error> {
    PoolBuilder::new(username, password, connect_string)
        .min_connections(0)
        .max_connections(POOL_POLICY.max_open)
        .build()
}

/// The client is blocking, so every call runs on the blocking thread pool
/// against a connection shared with that thread.
pub struct OracleBackend {
    pool: Arc<Pool>,
    connection: Option<Arc<Connection>>,
}

impl fmt::Debug for OracleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleBackend")
            .field("pinned", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl OracleBackend {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self {
            pool: Arc::new(pool),
            connection: None,
        }
    }

    /// Returns the connection pinned to this backend, taking it from the pool on first use.
    ///
    /// # Errors
    ///
    /// Will return `Err` if cannot get a connection
    pub async fn get_connection(&mut self) -> Result<Arc<Connection>, DatabaseError> {
        if let Some(connection) = &self.connection {
            log::trace!("Returning existing connection from oracle db pool");
            return Ok(connection.clone());
        }

        log::debug!("Fetching new connection from oracle db pool");
        let pool = self.pool.clone();
        let connection = tokio::task::spawn_blocking(move || {
            let mut connection = pool.get()?;
            connection.set_autocommit(true);
            connection.set_call_timeout(Some(QUERY_TIMEOUT))?;
            Ok::<_, oracle::Error>(connection)
        })
        .await??;

        Ok(self.connection.insert(Arc::new(connection)).clone())
    }

    async fn run<T, F>(&mut self, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, oracle::Error> + Send + 'static,
    {
        let connection = self.get_connection().await?;
        Ok(tokio::task::spawn_blocking(move || f(&connection)).await??)
    }
}

#[async_trait]
impl Backend for OracleBackend {
    fn engine(&self) -> Engine {
        Engine::Oracle
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        self.run(Connection::ping).await
    }

    async fn query(&mut self, statement: &str) -> Result<QueryOutput, DatabaseError> {
        let statement = statement.to_string();
        self.run(move |connection| select(connection, &statement))
            .await
    }

    async fn enable_server_output(&mut self) -> Result<(), DatabaseError> {
        self.run(|connection| {
            // SQL*Plus setting. Most servers reject it outside of SQL*Plus.
            if let Err(e) = connection.execute("SET SQLBLANKLINES ON", &[]) {
                log::debug!("enable_server_output: SQLBLANKLINES not accepted: {e}");
            }
            connection.execute("BEGIN DBMS_OUTPUT.ENABLE(NULL); END;", &[])?;
            Ok(())
        })
        .await
    }

    async fn drain_server_output(&mut self) -> Result<String, DatabaseError> {
        self.run(|connection| {
            let mut statement = connection
                .statement("BEGIN DBMS_OUTPUT.GET_LINE(:line, :status); END;")
                .build()?;
            let mut output = String::new();

            loop {
                statement.execute(&[
                    &OracleType::Varchar2(SERVER_OUTPUT_LINE_LEN),
                    &OracleType::Number(0, 0),
                ])?;

                let status: i32 = statement.bind_value(2)?;
                if status != 0 {
                    break;
                }

                let line: Option<String> = statement.bind_value(1)?;
                output.push_str(line.as_deref().unwrap_or_default());
                output.push('\n');
            }

            Ok(output)
        })
        .await
    }

    /// Sends a break to the server. If it cannot be delivered the pinned
    /// connection is dropped and the next statement takes a fresh one.
    async fn interrupt(&mut self) {
        let Some(connection) = self.connection.clone() else {
            return;
        };
        log::debug!("Breaking oracle execution");

        let outcome = tokio::time::timeout(
            CANCEL_TIMEOUT,
            tokio::task::spawn_blocking(move || connection.break_execution()),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(Ok(()))) => return,
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "break timed out".to_string(),
        };
        log::warn!("interrupt: failed to break oracle execution ({failure}), discarding connection");
        self.connection.take();
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        let connection = self.connection.take();
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(connection) = connection {
                connection.close()?;
            }
            pool.close(&CloseMode::Default)
        })
        .await??;

        Ok(())
    }
}

fn select(connection: &Connection, sql: &str) -> Result<QueryOutput, oracle::Error> {
    let mut statement = connection.statement(sql).build()?;

    if !statement.is_query() {
        statement.execute(&[])?;
        return Ok(QueryOutput::default());
    }

    let rows = statement.query(&[])?;
    let columns = rows
        .column_info()
        .iter()
        .map(|column| column.name().to_string())
        .collect::<Vec<_>>();

    let mut output = QueryOutput {
        columns,
        rows: vec![],
    };

    for row in rows {
        let row = row?;
        output.rows.push(
            row.sql_values()
                .iter()
                .map(column_value)
                .collect::<Result<_, _>>()?,
        );
    }

    Ok(output)
}

/// # Errors
///
/// * If the value cannot be converted from its reported type
pub fn column_value(value: &SqlValue) -> Result<DatabaseValue, oracle::Error> {
    use DatabaseValue as V;

    if value.is_null()? {
        return Ok(V::Null);
    }

    Ok(match value.oracle_type()? {
        // NUMBER has up to 38 significant digits so it stays text.
        OracleType::Number(_, _) | OracleType::Float(_) => V::Numeric(value.get()?),
        OracleType::Int64 => V::Int64(value.get()?),
        OracleType::UInt64 => V::UInt64(value.get()?),
        OracleType::BinaryFloat => V::Real32(value.get()?),
        OracleType::BinaryDouble => V::Real64(value.get()?),
        OracleType::Boolean => V::Bool(value.get()?),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => V::Bytes(value.get()?),
        OracleType::Date | OracleType::Timestamp(_) => {
            V::DateTime(value.get::<NaiveDateTime>()?)
        }
        OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
            V::DateTimeOffset(value.get::<DateTime<FixedOffset>>()?)
        }
        _ => V::String(value.get()?),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::BackendSession;

    /// `user/password@connect_string`
    fn get_oracle_test_url() -> Option<String> {
        std::env::var("ORACLE_TEST_URL").ok()
    }

    fn create_session(url: &str) -> BackendSession {
        let (credentials, connect_string) = url.rsplit_once('@').expect("Missing connect string");
        let (username, password) = credentials.split_once('/').expect("Missing password");
        let pool = build_pool(username, password, connect_string).expect("Failed to create pool");
        BackendSession::new(Box::new(OracleBackend::new(pool)))
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn renders_common_types() {
        let Some(url) = get_oracle_test_url() else {
            return;
        };
        let mut session = create_session(&url);

        let result = session
            .execute(
                "SELECT NULL AS n, 12345678901234567890123456789012.5 AS big, \
                 CAST('ab' AS CHAR(3)) AS padded, DATE '2024-01-31' AS d, \
                 HEXTORAW('CAFE') AS b FROM DUAL",
            )
            .await;

        assert_eq!(result.error, "");
        assert_eq!(result.columns, vec!["N", "BIG", "PADDED", "D", "B"]);
        assert_eq!(
            result.rows[0].values,
            vec![
                "<nil>",
                "12345678901234567890123456789012.5",
                "ab ",
                "2024-01-31 00:00:00",
                "0xcafe",
            ]
        );
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn timed_out_statement_is_broken() {
        let Some(url) = get_oracle_test_url() else {
            return;
        };
        let mut session = create_session(&url).with_query_timeout(Duration::from_secs(2));
        assert_eq!(session.execute("SELECT 1 FROM DUAL").await.error, "");

        let slow = session.execute("BEGIN DBMS_SESSION.SLEEP(30); END").await;
        assert!(slow.error.contains("timed out"), "{}", slow.error);

        let next = tokio::time::timeout(
            Duration::from_secs(10),
            session.execute("SELECT 2 AS two FROM DUAL"),
        )
        .await
        .unwrap();
        assert_eq!(next.error, "");
        assert_eq!(next.rows[0].values, vec!["2"]);
    }
}
