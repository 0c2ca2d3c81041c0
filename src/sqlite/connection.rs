use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};

use rusqlite::InterruptHandle;
use rusqlite::types::Value;
use tracing::debug;

use crate::driver::{Interrupt, PreparedQuery, RowCursor, SourceConnection};
use crate::error::{DriverError, SelectStreamError};
use crate::results::{CustomDbRow, RowLayout};
use crate::types::RowValues;

use super::config::SqliteOptions;
use super::params::row_value_to_sqlite_value;
use super::worker::{Command, CursorRequest, SqliteWorker, StatementInfo};

/// `SQLite` connection owned by a dedicated worker thread.
///
/// Clones share the same worker; the connection closes when [`SourceConnection::close`] is
/// called or the last clone is dropped.
#[derive(Clone)]
pub struct SqliteConnection {
    worker: Arc<SqliteWorker>,
}

impl SqliteConnection {
    /// Open a connection with `opts` and run its init batch.
    ///
    /// # Errors
    /// Returns `SelectStreamError::ConnectionError` if the database cannot be opened or the
    /// init batch fails.
    pub fn open(opts: &SqliteOptions) -> Result<Self, SelectStreamError> {
        Self::connect(opts).map_err(|err| {
            SelectStreamError::ConnectionError(format!(
                "failed to open SQLite database {}: {err}",
                opts.db_path
            ))
        })
    }

    pub(super) fn connect(opts: &SqliteOptions) -> Result<Self, DriverError> {
        let conn = rusqlite::Connection::open(&opts.db_path)?;
        conn.busy_timeout(opts.busy_timeout)?;
        if let Some(init_sql) = &opts.init_sql {
            conn.execute_batch(init_sql)?;
        }
        let worker = SqliteWorker::spawn(conn)?;
        debug!(worker = worker.id(), path = %opts.db_path, "opened SQLite connection");
        Ok(Self {
            worker: Arc::new(worker),
        })
    }

    /// Execute a batch of SQL statements (schema setup, `BEGIN`/`COMMIT`, ...).
    ///
    /// # Errors
    /// Returns `SelectStreamError::ExecutionError` if any statement fails.
    pub fn execute_batch(&self, query: &str) -> Result<(), SelectStreamError> {
        let query = query.to_owned();
        self.worker
            .request(
                |respond_to| Command::ExecuteBatch { query, respond_to },
                "SQLite worker dropped while executing batch",
            )
            .map_err(SelectStreamError::ExecutionError)
    }

    /// Execute a DML statement (INSERT/UPDATE/DELETE) and return the affected row count.
    ///
    /// # Errors
    /// Returns `SelectStreamError::ExecutionError` if the statement fails.
    pub fn execute_dml(&self, query: &str, params: &[RowValues]) -> Result<usize, SelectStreamError> {
        let query = query.to_owned();
        let params: Vec<Value> = params.iter().map(row_value_to_sqlite_value).collect();
        self.worker
            .request(
                |respond_to| Command::ExecuteDml {
                    query,
                    params,
                    respond_to,
                },
                "SQLite worker dropped while executing dml",
            )
            .map_err(SelectStreamError::ExecutionError)
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("worker", &self.worker.id())
            .finish()
    }
}

impl SourceConnection for SqliteConnection {
    type Statement = SqliteStatement;

    fn prepare(&mut self, sql: &str) -> Result<SqliteStatement, DriverError> {
        let query: Arc<str> = Arc::from(sql);
        let info: StatementInfo = self.worker.request(
            |respond_to| Command::Prepare {
                query: Arc::clone(&query),
                respond_to,
            },
            "SQLite worker dropped while preparing statement",
        )?;
        Ok(SqliteStatement {
            connection: self.clone(),
            query,
            params: vec![Value::Null; info.parameter_count],
            layout: RowLayout::new(info.columns),
        })
    }

    fn close(self) -> Result<(), DriverError> {
        self.worker.request(
            |respond_to| Command::Close { respond_to },
            "SQLite worker dropped while closing connection",
        )
    }
}

/// A statement prepared on a [`SqliteConnection`], holding its bound parameters.
pub struct SqliteStatement {
    connection: SqliteConnection,
    query: Arc<str>,
    params: Vec<Value>,
    layout: RowLayout,
}

impl SqliteStatement {
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.layout.column_names()
    }
}

impl PreparedQuery for SqliteStatement {
    type Cursor = SqliteCursor;

    fn bind(&mut self, index: usize, value: &RowValues) -> Result<(), DriverError> {
        let count = self.params.len();
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.params.get_mut(i))
            .ok_or_else(|| {
                DriverError::ParameterError(format!(
                    "parameter index {index} out of range, statement takes {count}"
                ))
            })?;
        *slot = row_value_to_sqlite_value(value);
        Ok(())
    }

    fn execute(&mut self) -> Result<SqliteCursor, DriverError> {
        let (requests, receiver) = mpsc::channel();
        let params = self.params.clone();
        let columns = self.connection.worker.request(
            |respond_to| Command::OpenCursor {
                query: Arc::clone(&self.query),
                params,
                requests: receiver,
                respond_to,
            },
            "SQLite worker dropped while executing query",
        )?;
        Ok(SqliteCursor {
            _connection: self.connection.clone(),
            requests,
            layout: RowLayout::new(columns),
        })
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        let interrupter: Arc<dyn Interrupt> =
            Arc::new(SqliteInterrupt(self.connection.worker.interrupt_handle()));
        Some(interrupter)
    }

    fn close(self) -> Result<(), DriverError> {
        // Prepared statements are finalized by the worker when their cursor closes.
        Ok(())
    }
}

/// Rows of an executed statement, fetched from the worker one at a time.
pub struct SqliteCursor {
    // Keeps the worker alive while the cursor is open.
    _connection: SqliteConnection,
    requests: Sender<CursorRequest>,
    layout: RowLayout,
}

impl RowCursor for SqliteCursor {
    fn advance(&mut self) -> Result<Option<CustomDbRow>, DriverError> {
        let (respond_to, response) = mpsc::channel();
        self.requests
            .send(CursorRequest::Next { respond_to })
            .map_err(|_| DriverError::Closed("SQLite cursor".into()))?;
        let values = response
            .recv()
            .map_err(|_| DriverError::Closed("SQLite cursor".into()))??;
        Ok(values.map(|values| CustomDbRow::with_layout(&self.layout, values)))
    }

    fn close(self) -> Result<(), DriverError> {
        let (respond_to, ack) = mpsc::channel();
        if self.requests.send(CursorRequest::Close { respond_to }).is_ok() {
            // An error here means the worker already dropped the cursor.
            let _ = ack.recv();
        }
        Ok(())
    }
}

struct SqliteInterrupt(Arc<InterruptHandle>);

impl Interrupt for SqliteInterrupt {
    fn interrupt(&self) {
        self.0.interrupt();
    }
}
