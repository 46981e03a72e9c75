use std::io::Write;

use sqlrepl_database::BackendSession;
use sqlrepl_database_connection::{ConnectError, connect};
use sqlrepl_protocol::QueryResult;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};

const EXIT_COMMAND: &str = "exit";
const PROMPT: &str = "> ";

#[derive(Debug, Error)]
pub enum InteractiveError {
    #[error("Error connecting to database: {0}")]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connects and runs the prompt loop on stdin and stdout.
///
/// # Errors
///
/// * If the connection cannot be established
/// * If writing to stdout fails
pub async fn run(dbtype: &str, connstring: &str) -> Result<(), InteractiveError> {
    let mut session = connect(dbtype, connstring).await?;

    let result = repl(
        &mut session,
        BufReader::new(tokio::io::stdin()),
        &mut std::io::stdout(),
    )
    .await;

    if let Err(e) = session.close().await {
        log::warn!("Failed to close session: {e}");
    }

    result
}

async fn repl<R, W>(
    session: &mut BackendSession,
    input: R,
    output: &mut W,
) -> Result<(), InteractiveError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(output, "Connected. Enter SQL queries (or '{EXIT_COMMAND}' to quit):")?;

    let mut lines = input.lines();

    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Error reading input: {e}");
                break;
            }
        };

        if line == EXIT_COMMAND {
            break;
        }

        let result = session.execute(&line).await;
        print_result(&result, output)?;
    }

    Ok(())
}

fn print_result(result: &QueryResult, output: &mut impl Write) -> std::io::Result<()> {
    if result.is_error() {
        return writeln!(output, "Error: {}", result.error);
    }

    if !result.columns.is_empty() {
        for column in &result.columns {
            write!(output, "{column}\t")?;
        }
        writeln!(output)?;
    }

    for row in &result.rows {
        for value in &row.values {
            write!(output, "{value}\t")?;
        }
        writeln!(output)?;
    }

    if !result.message.is_empty() {
        writeln!(output, "{}", result.message)?;
    }

    Ok(())
}
