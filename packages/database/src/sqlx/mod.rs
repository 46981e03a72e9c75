use std::time::Duration;

#[cfg(any(feature = "mysql", feature = "postgres"))]
use futures::{TryStreamExt as _, stream::BoxStream};
#[cfg(any(feature = "mysql", feature = "postgres"))]
use sqlx::{Column as _, Either};

#[cfg(any(feature = "mysql", feature = "postgres"))]
use crate::{DatabaseError, DatabaseValue, QueryOutput};

#[cfg(feature = "mysql")]
/// `MySQL` backend using `SQLx`
pub mod mysql;
#[cfg(feature = "postgres")]
/// `PostgreSQL` backend using `SQLx`
pub mod postgres;
#[cfg(feature = "sqlite")]
/// `SQLite` backend using `SQLx`
pub mod sqlite;

/// Errors after which the pinned connection cannot be trusted anymore.
pub(crate) const fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    )
}

/// Bound on asking the server to cancel a timed-out statement.
pub(crate) const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Collects the rows of the first result set and drains the rest, so the
/// connection is ready for the next statement. Without prepared column
/// names, they are read from the first row.
#[cfg(any(feature = "mysql", feature = "postgres"))]
pub(crate) async fn first_result_set<Q, R: sqlx::Row>(
    mut columns: Option<Vec<String>>,
    mut results: BoxStream<'_, Result<Either<Q, R>, sqlx::Error>>,
    from_row: fn(&R) -> Result<Vec<DatabaseValue>, DatabaseError>,
) -> Result<QueryOutput, DatabaseError> {
    let mut rows = vec![];
    let mut first_done = false;
    let mut skipped = 0_usize;

    while let Some(result) = results.try_next().await? {
        match result {
            Either::Left(_) => first_done = true,
            Either::Right(_) if first_done => skipped += 1,
            Either::Right(row) => {
                if columns.is_none() {
                    columns = Some(
                        row.columns()
                            .iter()
                            .map(|column| column.name().to_string())
                            .collect(),
                    );
                }
                rows.push(from_row(&row)?);
            }
        }
    }

    if skipped > 0 {
        log::debug!("first_result_set: discarded {skipped} rows of later result sets");
    }

    Ok(QueryOutput {
        columns: columns.unwrap_or_default(),
        rows,
    })
}
