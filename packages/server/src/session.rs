use futures::{SinkExt as _, StreamExt as _};
use sqlrepl_database::{BackendSession, Engine, EngineParseError};
use sqlrepl_database_connection::{ConnectError, connect_engine};
use sqlrepl_protocol::{
    Command, ConnectionParams, Frame, ParamsError, ProtocolError, QueryResult, ReplCodec,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::ConnectionContext;

pub const INVALID_PARAMETERS: &str = "Invalid connection parameters";
pub const CONNECT_FAILED: &str = "Failed to connect to database";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Invalid connection parameters: {0}")]
    Params(#[from] ParamsError),
    #[error("Invalid connection parameters: {0}")]
    Engine(#[from] EngineParseError),
    #[error("Failed to connect to database: {0}")]
    Connect(#[from] ConnectError),
}

impl SessionError {
    /// The message sent to the client, if the client can be told at all.
    #[must_use]
    pub const fn client_message(&self) -> Option<&'static str> {
        match self {
            Self::Protocol(_) => None,
            Self::Params(_) | Self::Engine(_) => Some(INVALID_PARAMETERS),
            Self::Connect(_) => Some(CONNECT_FAILED),
        }
    }
}

/// Runs one client connection to completion: reads the parameter line,
/// connects, then answers every following line with exactly one frame until
/// the client disconnects.
///
/// # Errors
///
/// * If bootstrap fails
/// * If reading or writing the connection fails
pub async fn handle_connection<S>(stream: S, ctx: ConnectionContext) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, ReplCodec::new());

    let mut session = match bootstrap(&mut framed, ctx).await {
        Ok(session) => session,
        Err(e) => {
            log::warn!("{ctx} bootstrap failed: {e}");
            if let Some(message) = e.client_message() {
                let frame = Frame::BootstrapError(QueryResult::error(message));
                if let Err(send_error) = framed.send(frame).await {
                    log::debug!("{ctx} failed to report bootstrap failure: {send_error:?}");
                }
            }
            return Err(e);
        }
    };

    let result = command_loop(&mut framed, &mut session, ctx).await;

    if let Err(e) = session.close().await {
        log::warn!("{ctx} failed to close backend session: {e}");
    }

    result
}

async fn bootstrap<S>(
    framed: &mut Framed<S, ReplCodec>,
    ctx: ConnectionContext,
) -> Result<BackendSession, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = framed.next().await.ok_or(ProtocolError::UnexpectedEof)??;
    let params = ConnectionParams::from_line(&line)?;
    let engine = params.dbtype.parse::<Engine>()?;

    log::debug!("{ctx} bootstrap: connecting to {engine}");

    let session = connect_engine(engine, &params.connstring).await?;

    log::info!("{ctx} connected to {engine}");

    Ok(session)
}

async fn command_loop<S>(
    framed: &mut Framed<S, ReplCodec>,
    session: &mut BackendSession,
    ctx: ConnectionContext,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e @ ProtocolError::LineTooLong(_)) => {
                log::warn!("{ctx} {e}, closing connection");
                let frame = Frame::Result(QueryResult::error(e.to_string()));
                if let Err(send_error) = framed.send(frame).await {
                    log::debug!("{ctx} failed to report oversized line: {send_error:?}");
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let frame = match Command::from_line(&line) {
            Command::BatchSync => {
                log::trace!("{ctx} batch sync");
                Frame::Sync
            }
            Command::Statement(statement) => {
                sqlrepl_logging::debug_or_trace!(
                    ("{ctx} executing statement"),
                    ("{ctx} executing statement: {statement}")
                );
                let result = session.execute(&statement).await;
                if result.is_error() {
                    log::debug!("{ctx} statement failed: {}", result.error);
                }
                Frame::Result(result)
            }
        };

        if let Err(e) = framed.send(frame).await {
            log::error!("{ctx} failed to write response: {e}");
            return Err(e.into());
        }
    }

    log::debug!("{ctx} client disconnected");

    Ok(())
}
