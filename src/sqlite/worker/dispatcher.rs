use std::sync::mpsc::{Receiver, Sender};

use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params_from_iter};
use tracing::debug;

use crate::error::DriverError;
use crate::sqlite::params::sqlite_extract_row;

use super::channel::{Command, CursorRequest, Reply, StatementInfo};

pub(super) fn run_sqlite_worker(conn: Connection, receiver: &Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Shutdown => break,
            Command::Close { respond_to } => {
                let res = conn.close().map_err(|(_, err)| driver_error(err));
                let _ = respond_to.send(res);
                return;
            }
            Command::ExecuteBatch { query, respond_to } => {
                let _ = respond_to.send(conn.execute_batch(&query).map_err(driver_error));
            }
            Command::ExecuteDml {
                query,
                params,
                respond_to,
            } => {
                let _ = respond_to.send(execute_dml(&conn, &query, &params));
            }
            Command::Prepare { query, respond_to } => {
                let _ = respond_to.send(prepare(&conn, &query));
            }
            Command::OpenCursor {
                query,
                params,
                requests,
                respond_to,
            } => serve_cursor(&conn, &query, &params, &requests, respond_to),
        }
    }
    debug!("SQLite worker shutting down");
}

/// Map rusqlite failures, singling out interruption.
pub(super) fn driver_error(err: rusqlite::Error) -> DriverError {
    if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
        DriverError::Interrupted
    } else {
        DriverError::SqliteError(err)
    }
}

fn execute_dml(conn: &Connection, query: &str, params: &[Value]) -> Result<usize, DriverError> {
    let mut stmt = conn.prepare(query).map_err(driver_error)?;
    stmt.execute(params_from_iter(params.iter()))
        .map_err(driver_error)
}

fn prepare(conn: &Connection, query: &str) -> Result<StatementInfo, DriverError> {
    let stmt = conn.prepare(query).map_err(driver_error)?;
    Ok(StatementInfo {
        parameter_count: stmt.parameter_count(),
        columns: column_names(&stmt),
    })
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

// The statement and its rows live on this stack frame, so the worker serves nothing but
// cursor requests until the cursor is closed or its handle dropped.
fn serve_cursor(
    conn: &Connection,
    query: &str,
    params: &[Value],
    requests: &Receiver<CursorRequest>,
    respond_to: Reply<Vec<String>>,
) {
    let mut stmt = match conn.prepare(query) {
        Ok(stmt) => stmt,
        Err(err) => {
            let _ = respond_to.send(Err(driver_error(err)));
            return;
        }
    };
    let columns = column_names(&stmt);
    let column_count = columns.len();
    let mut rows = match stmt.query(params_from_iter(params.iter())) {
        Ok(rows) => rows,
        Err(err) => {
            let _ = respond_to.send(Err(driver_error(err)));
            return;
        }
    };
    if respond_to.send(Ok(columns)).is_err() {
        return;
    }

    let mut close_ack: Option<Sender<()>> = None;
    while let Ok(request) = requests.recv() {
        match request {
            CursorRequest::Next { respond_to } => {
                let next = match rows.next() {
                    Ok(Some(row)) => sqlite_extract_row(row, column_count).map(Some),
                    Ok(None) => Ok(None),
                    Err(err) => Err(driver_error(err)),
                };
                let _ = respond_to.send(next);
            }
            CursorRequest::Close { respond_to } => {
                close_ack = Some(respond_to);
                break;
            }
        }
    }
    drop(rows);
    drop(stmt);
    if let Some(ack) = close_ack {
        let _ = ack.send(());
    }
}
