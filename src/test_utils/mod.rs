//! Helper utilities for testing: a scripted in-memory driver and a recording subscriber that
//! write into one shared journal, so tests can check the global order of signals and releases.

mod journal;
mod scripted;

use std::sync::Arc;

pub use journal::{EventJournal, JournalEvent, RecordingSubscriber};
pub use scripted::{
    STALL_LIMIT, Script, ScriptedConnection, ScriptedCursor, ScriptedSource, ScriptedStatement,
};

use crate::results::CustomDbRow;
use crate::types::RowValues;

/// Create a single-column `id` row.
#[must_use]
pub fn id_row(id: i64) -> CustomDbRow {
    CustomDbRow::new(Arc::new(vec!["id".to_string()]), vec![RowValues::Int(id)])
}
