use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::SelectStreamError;
use crate::results::CustomDbRow;
use crate::subscriber::Subscriber;
use crate::types::RowValues;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    Acquired,
    Next(i64),
    Completed,
    Error(String),
    Interrupted,
    CursorClosed,
    StatementClosed,
    ConnectionClosed,
    ConnectionLeftOpen,
}

impl JournalEvent {
    #[must_use]
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Next(_) | Self::Completed | Self::Error(_))
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error(_))
    }

    #[must_use]
    pub fn is_release(&self) -> bool {
        matches!(
            self,
            Self::CursorClosed
                | Self::StatementClosed
                | Self::ConnectionClosed
                | Self::ConnectionLeftOpen
        )
    }
}

#[derive(Default)]
struct JournalInner {
    events: Mutex<Vec<JournalEvent>>,
    changed: Condvar,
}

/// Append-only, thread-safe log shared by the scripted driver and the recording subscriber.
#[derive(Clone, Default)]
pub struct EventJournal {
    inner: Arc<JournalInner>,
}

impl EventJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: JournalEvent) {
        self.inner.events.lock().push(event);
        self.inner.changed.notify_all();
    }

    #[must_use]
    pub fn events(&self) -> Vec<JournalEvent> {
        self.inner.events.lock().clone()
    }

    /// Rows and terminal signals, in delivery order.
    #[must_use]
    pub fn signals(&self) -> Vec<JournalEvent> {
        self.filtered(JournalEvent::is_signal)
    }

    #[must_use]
    pub fn releases(&self) -> Vec<JournalEvent> {
        self.filtered(JournalEvent::is_release)
    }

    #[must_use]
    pub fn count(&self, event: &JournalEvent) -> usize {
        self.inner.events.lock().iter().filter(|e| *e == event).count()
    }

    #[must_use]
    pub fn position(&self, event: &JournalEvent) -> Option<usize> {
        self.inner.events.lock().iter().position(|e| e == event)
    }

    /// Block until `event` has been recorded or `timeout` passes.
    pub fn wait_for(&self, event: &JournalEvent, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.inner.events.lock();
        loop {
            if events.iter().any(|e| e == event) {
                return true;
            }
            if self
                .inner
                .changed
                .wait_until(&mut events, deadline)
                .timed_out()
            {
                return events.iter().any(|e| e == event);
            }
        }
    }

    fn filtered(&self, keep: impl Fn(&JournalEvent) -> bool) -> Vec<JournalEvent> {
        self.inner
            .events
            .lock()
            .iter()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }
}

type RowHook = Box<dyn FnMut(&CustomDbRow) + Send>;

/// Subscriber that records every signal into an [`EventJournal`].
///
/// Rows are recorded by their first integer column.
pub struct RecordingSubscriber {
    journal: EventJournal,
    on_row: Option<RowHook>,
}

impl RecordingSubscriber {
    #[must_use]
    pub fn new(journal: EventJournal) -> Self {
        Self {
            journal,
            on_row: None,
        }
    }

    /// Run `hook` after each row has been recorded.
    #[must_use]
    pub fn with_row_hook(mut self, hook: impl FnMut(&CustomDbRow) + Send + 'static) -> Self {
        self.on_row = Some(Box::new(hook));
        self
    }
}

impl Subscriber for RecordingSubscriber {
    fn on_next(&mut self, row: CustomDbRow) {
        let id = match row.get_by_index(0) {
            Some(RowValues::Int(id)) => *id,
            _ => -1,
        };
        self.journal.record(JournalEvent::Next(id));
        if let Some(hook) = self.on_row.as_mut() {
            hook(&row);
        }
    }

    fn on_error(&mut self, error: SelectStreamError) {
        self.journal.record(JournalEvent::Error(error.to_string()));
    }

    fn on_completed(&mut self) {
        self.journal.record(JournalEvent::Completed);
    }
}
