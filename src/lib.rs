//! Stream the rows of a blocking, cursor-based query into a push-style [`Subscriber`], while
//! any other thread may cancel the execution at any moment.
//!
//! ```rust,no_run
//! # #[cfg(feature = "sqlite")]
//! # fn demo() -> Result<(), sql_select_stream::SelectStreamError> {
//! use std::sync::Arc;
//! use sql_select_stream::prelude::*;
//!
//! struct Print;
//!
//! impl Subscriber for Print {
//!     fn on_next(&mut self, row: CustomDbRow) {
//!         println!("{:?}", row.get("name"));
//!     }
//!     fn on_error(&mut self, error: SelectStreamError) {
//!         eprintln!("query failed: {error}");
//!     }
//!     fn on_completed(&mut self) {}
//! }
//!
//! let source = Arc::new(SqliteSource::auto(SqliteOptions::new("app.db".into())));
//! let query = QueryDescriptor::new("SELECT name FROM users WHERE id > ?1", source);
//! let bridge = Arc::new(ExecutionBridge::new(query, vec![RowValues::Int(10)], Print));
//!
//! let cancel = bridge.cancel_handle();
//! let worker = std::thread::spawn({
//!     let bridge = Arc::clone(&bridge);
//!     move || bridge.drive()
//! });
//! cancel.cancel();
//! let _state = worker.join();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod driver;
pub mod error;
mod handle;
pub mod prelude;
pub mod results;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod stream;
pub mod subscriber;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

pub use bridge::{CancelHandle, ExecutionBridge, ExecutionState};
pub use driver::{
    Acquired, ConnectionSource, Interrupt, ParameterBinder, PositionalBinder, PreparedQuery,
    QueryDescriptor, ReleasePolicy, RowCursor, SourceConnection,
};
pub use error::{DriverError, SelectStreamError};
pub use results::{CustomDbRow, RowLayout};
pub use stream::SelectStream;
pub use subscriber::Subscriber;
pub use types::{ParameterList, RowValues};
