use thiserror::Error;

/// Failure reported by a driver collaborator (connection source, statement, cursor).
#[derive(Debug, Error)]
pub enum DriverError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("operation interrupted")]
    Interrupted,

    #[error("resource already closed: {0}")]
    Closed(String),

    #[error("Parameter binding error: {0}")]
    ParameterError(String),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by this crate.
///
/// The four phase variants are what a subscriber sees through `on_error`; each wraps the
/// driver failure that ended the execution. None of them is retried internally.
#[derive(Debug, Error)]
pub enum SelectStreamError {
    /// Connection acquisition or statement preparation failed.
    #[error("Acquisition error: {0}")]
    AcquisitionError(#[source] DriverError),

    /// Parameter binding failed.
    #[error("Binding error: {0}")]
    BindingError(#[source] DriverError),

    /// The blocking execute call failed.
    #[error("Execution error: {0}")]
    ExecutionError(#[source] DriverError),

    /// Advancing the cursor failed mid-stream.
    #[error("Iteration error: {0}")]
    IterationError(#[source] DriverError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl SelectStreamError {
    /// The driver failure behind a phase error, if any.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::AcquisitionError(err)
            | Self::BindingError(err)
            | Self::ExecutionError(err)
            | Self::IterationError(err) => Some(err),
            Self::ConfigError(_) | Self::ConnectionError(_) => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SelectStreamError {
    fn from(err: rusqlite::Error) -> Self {
        SelectStreamError::ExecutionError(DriverError::SqliteError(err))
    }
}
