//! Collaborator contracts the execution bridge drives.
//!
//! A driver supplies four pieces: a [`ConnectionSource`] that hands out connections, the
//! [`SourceConnection`] that prepares statements, the [`PreparedQuery`] that executes, and
//! the [`RowCursor`] that yields rows. Every call may block for an unbounded time; the
//! bridge never assumes otherwise.

use std::sync::Arc;

use serde::Serialize;

use crate::error::DriverError;
use crate::results::CustomDbRow;
use crate::types::RowValues;

/// What the resource handle does with a connection when the execution is torn down.
///
/// The connection source decides this; the bridge only follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReleasePolicy {
    /// Auto-managed connection: closed on release.
    Close,
    /// Connection under caller-managed transaction control: left open so the caller can
    /// commit or roll back. Only the handle's reference is dropped.
    LeaveOpen,
}

/// Statement type of a connection.
pub type StatementOf<C> = <C as SourceConnection>::Statement;
/// Cursor type of a connection's statements.
pub type CursorOf<C> = <StatementOf<C> as PreparedQuery>::Cursor;

/// A connection handed out by a [`ConnectionSource`] together with its release policy.
#[derive(Debug)]
pub struct Acquired<C> {
    pub connection: C,
    pub release: ReleasePolicy,
}

impl<C> Acquired<C> {
    #[must_use]
    pub fn new(connection: C, release: ReleasePolicy) -> Self {
        Self {
            connection,
            release,
        }
    }
}

/// Source of connections for a query.
pub trait ConnectionSource: Send + Sync {
    type Connection: SourceConnection;

    /// Obtain a connection (perhaps from a pool).
    ///
    /// # Errors
    /// Returns [`DriverError`] if no connection could be acquired.
    fn get(&self) -> Result<Acquired<Self::Connection>, DriverError>;
}

pub trait SourceConnection: Send + 'static {
    type Statement: PreparedQuery;

    /// Prepare `sql` for execution.
    ///
    /// # Errors
    /// Returns [`DriverError`] if the statement cannot be prepared.
    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, DriverError>;

    /// Close the connection.
    ///
    /// # Errors
    /// Returns [`DriverError`] if the driver reports a failure while closing.
    fn close(self) -> Result<(), DriverError>;
}

pub trait PreparedQuery: Send + 'static {
    type Cursor: RowCursor;

    /// Bind `value` at the 1-based parameter `index`.
    ///
    /// # Errors
    /// Returns [`DriverError`] if the index is out of range or the value is unsupported.
    fn bind(&mut self, index: usize, value: &RowValues) -> Result<(), DriverError>;

    /// Run the statement and open a cursor over its rows.
    ///
    /// # Errors
    /// Returns [`DriverError`] if execution fails.
    fn execute(&mut self) -> Result<Self::Cursor, DriverError>;

    /// A handle that can abort this statement's in-flight work from another thread.
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }

    /// Close the statement.
    ///
    /// # Errors
    /// Returns [`DriverError`] if the driver reports a failure while closing.
    fn close(self) -> Result<(), DriverError>;
}

pub trait RowCursor: Send + 'static {
    /// Move to the next row. `Ok(None)` means the cursor is exhausted.
    ///
    /// # Errors
    /// Returns [`DriverError`] if fetching the next row fails.
    fn advance(&mut self) -> Result<Option<CustomDbRow>, DriverError>;

    /// Close the cursor.
    ///
    /// # Errors
    /// Returns [`DriverError`] if the driver reports a failure while closing.
    fn close(self) -> Result<(), DriverError>;
}

/// Out-of-band abort for a statement that may be blocked inside the driver.
///
/// Must be callable from any thread while another thread is inside `execute` or `advance`.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Binds a parameter list into a prepared statement.
pub trait ParameterBinder<St>: Send + Sync {
    /// # Errors
    /// Returns [`DriverError`] if any value cannot be bound.
    fn bind(&self, statement: &mut St, params: &[RowValues]) -> Result<(), DriverError>;
}

/// Binds value `i` of the list at parameter index `i + 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalBinder;

impl<St: PreparedQuery> ParameterBinder<St> for PositionalBinder {
    fn bind(&self, statement: &mut St, params: &[RowValues]) -> Result<(), DriverError> {
        for (i, value) in params.iter().enumerate() {
            statement.bind(i + 1, value)?;
        }
        Ok(())
    }
}

/// An immutable (SQL template, source of connections) pair.
#[derive(Debug)]
pub struct QueryDescriptor<S> {
    sql: Arc<str>,
    source: Arc<S>,
}

impl<S> Clone for QueryDescriptor<S> {
    fn clone(&self) -> Self {
        Self {
            sql: Arc::clone(&self.sql),
            source: Arc::clone(&self.source),
        }
    }
}

impl<S: ConnectionSource> QueryDescriptor<S> {
    #[must_use]
    pub fn new(sql: impl Into<Arc<str>>, source: Arc<S>) -> Self {
        Self {
            sql: sql.into(),
            source,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }
}
