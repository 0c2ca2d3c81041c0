use std::time::Duration;

use crate::error::SelectStreamError;

use super::connection::SqliteConnection;
use super::source::SqliteSource;

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for opening `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub busy_timeout: Duration,
    /// Batch run on every new connection (pragmas and the like).
    pub init_sql: Option<String>,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            init_sql: None,
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn with_init_sql(mut self, init_sql: impl Into<String>) -> Self {
        self.init_sql = Some(init_sql.into());
        self
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    /// Switch new connections to WAL journaling.
    #[must_use]
    pub fn wal(mut self) -> Self {
        self.opts.init_sql = Some("PRAGMA journal_mode = WAL;".to_string());
        self
    }

    #[must_use]
    pub fn init_sql(mut self, init_sql: impl Into<String>) -> Self {
        self.opts.init_sql = Some(init_sql.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// A source that opens (and later closes) a fresh connection for every execution.
    ///
    /// # Errors
    /// Returns `SelectStreamError::ConfigError` if the database path is empty.
    pub fn build_source(self) -> Result<SqliteSource, SelectStreamError> {
        let opts = self.finish();
        if opts.db_path.trim().is_empty() {
            return Err(SelectStreamError::ConfigError(
                "SQLite database path must not be empty".into(),
            ));
        }
        Ok(SqliteSource::auto(opts))
    }

    /// Open a single connection for the caller to manage.
    ///
    /// # Errors
    /// Returns `SelectStreamError::ConnectionError` if the database cannot be opened.
    pub fn connect(self) -> Result<SqliteConnection, SelectStreamError> {
        SqliteConnection::open(&self.finish())
    }
}
