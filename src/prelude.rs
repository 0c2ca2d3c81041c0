//! Convenient imports for common functionality.

pub use crate::bridge::{CancelHandle, ExecutionBridge, ExecutionState};
pub use crate::driver::{
    Acquired, ConnectionSource, Interrupt, ParameterBinder, PositionalBinder, QueryDescriptor,
    ReleasePolicy,
};
pub use crate::error::{DriverError, SelectStreamError};
pub use crate::results::CustomDbRow;
pub use crate::stream::SelectStream;
pub use crate::subscriber::Subscriber;
pub use crate::types::{ParameterList, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnection, SqliteOptions, SqliteOptionsBuilder, SqliteSource};
