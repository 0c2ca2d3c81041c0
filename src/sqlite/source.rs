use std::fmt;

use crate::driver::{Acquired, ConnectionSource, ReleasePolicy};
use crate::error::DriverError;

use super::config::SqliteOptions;
use super::connection::SqliteConnection;

/// Hands out `SQLite` connections to executions.
pub struct SqliteSource {
    mode: SourceMode,
}

enum SourceMode {
    Auto(SqliteOptions),
    CallerManaged(SqliteConnection),
}

impl SqliteSource {
    /// Every execution opens its own connection, which is closed when the execution ends.
    #[must_use]
    pub fn auto(opts: SqliteOptions) -> Self {
        Self {
            mode: SourceMode::Auto(opts),
        }
    }

    /// Every execution runs on `conn` and leaves it open afterwards, so the caller can commit
    /// or roll back a transaction it began.
    ///
    /// Executions on the same connection are served one cursor at a time by its worker.
    #[must_use]
    pub fn caller_managed(conn: SqliteConnection) -> Self {
        Self {
            mode: SourceMode::CallerManaged(conn),
        }
    }

    #[must_use]
    pub fn release_policy(&self) -> ReleasePolicy {
        match self.mode {
            SourceMode::Auto(_) => ReleasePolicy::Close,
            SourceMode::CallerManaged(_) => ReleasePolicy::LeaveOpen,
        }
    }
}

impl ConnectionSource for SqliteSource {
    type Connection = SqliteConnection;

    fn get(&self) -> Result<Acquired<SqliteConnection>, DriverError> {
        let connection = match &self.mode {
            SourceMode::Auto(opts) => SqliteConnection::connect(opts)?,
            SourceMode::CallerManaged(conn) => conn.clone(),
        };
        Ok(Acquired::new(connection, self.release_policy()))
    }
}

impl fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            SourceMode::Auto(opts) => f.debug_tuple("SqliteSource::Auto").field(opts).finish(),
            SourceMode::CallerManaged(conn) => f
                .debug_tuple("SqliteSource::CallerManaged")
                .field(conn)
                .finish(),
        }
    }
}
