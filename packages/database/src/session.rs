use std::time::Duration;

use sqlrepl_protocol::{QueryResult, Row};

use crate::{Backend, DatabaseError, Engine, EngineCapabilities, PostQuery, QueryOutput, SessionInit};

/// Wall-clock bound on every statement, including reading its rows.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(20);

/// A backend bound to one client connection for its whole lifetime.
#[derive(Debug)]
pub struct BackendSession {
    engine: Engine,
    capabilities: &'static EngineCapabilities,
    backend: Option<Box<dyn Backend>>,
    timeout: Duration,
}

impl BackendSession {
    #[must_use]
    pub fn new(backend: Box<dyn Backend>) -> Self {
        let engine = backend.engine();

        Self {
            engine,
            capabilities: engine.capabilities(),
            backend: Some(backend),
            timeout: QUERY_TIMEOUT,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn engine(&self) -> Engine {
        self.engine
    }

    /// Runs the engine's session init hook.
    ///
    /// # Errors
    ///
    /// * If the hook fails
    pub async fn init(&mut self) -> Result<(), DatabaseError> {
        match self.capabilities.session_init {
            SessionInit::None => Ok(()),
            SessionInit::EnableServerOutput => self.backend()?.enable_server_output().await,
        }
    }

    /// # Errors
    ///
    /// * If the backend is not reachable
    pub async fn ping(&mut self) -> Result<(), DatabaseError> {
        self.backend()?.ping().await
    }

    /// Runs one statement. Failures are reported in the result's `error`
    /// field and leave the session usable.
    pub async fn execute(&mut self, statement: &str) -> QueryResult {
        match self.try_execute(statement).await {
            Ok(result) => result,
            Err(e) => {
                log::debug!("execute: {} statement failed: {e:?}", self.engine);
                QueryResult::error(e.to_string())
            }
        }
    }

    async fn try_execute(&mut self, statement: &str) -> Result<QueryResult, DatabaseError> {
        let pre_query = self.capabilities.pre_query;
        let post_query = self.capabilities.post_query;
        let timeout = self.timeout;
        let backend = self.backend()?;
        let statement = pre_query(statement);

        let outcome = tokio::time::timeout(timeout, backend.query(&statement)).await;

        let output = match outcome {
            Ok(output) => output?,
            Err(_) => {
                log::warn!(
                    "execute: {} statement exceeded {timeout:?}, interrupting",
                    backend.engine()
                );
                backend.interrupt().await;
                return Err(DatabaseError::Timeout(timeout));
            }
        };

        let mut result = render(output)?;

        match post_query {
            PostQuery::None => {}
            PostQuery::DrainServerOutput => {
                result.message = backend.drain_server_output().await?;
            }
        }

        Ok(result)
    }

    /// Releases the backend. Dropping a session releases it too, without
    /// waiting for the server to acknowledge.
    ///
    /// # Errors
    ///
    /// * If the backend fails to shut down cleanly
    pub async fn close(mut self) -> Result<(), DatabaseError> {
        if let Some(mut backend) = self.backend.take() {
            backend.close().await?;
            log::debug!("close: {} session closed", self.engine);
        }
        Ok(())
    }

    fn backend(&mut self) -> Result<&mut Box<dyn Backend>, DatabaseError> {
        self.backend.as_mut().ok_or(DatabaseError::Closed)
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        if self.backend.take().is_some() {
            log::debug!("drop: releasing {} session without close", self.engine);
        }
    }
}

fn render(output: QueryOutput) -> Result<QueryResult, DatabaseError> {
    let expected = output.columns.len();
    let mut rows = Vec::with_capacity(output.rows.len());

    for values in output.rows {
        if values.len() != expected {
            return Err(DatabaseError::RowLength {
                expected,
                actual: values.len(),
            });
        }

        rows.push(Row::new(values.iter().map(ToString::to_string).collect()));
    }

    Ok(QueryResult {
        columns: output.columns,
        rows,
        message: String::new(),
        error: String::new(),
    })
}
