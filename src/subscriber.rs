use tracing::warn;

use crate::error::SelectStreamError;
use crate::results::CustomDbRow;

/// Push-based consumer of one execution.
///
/// A subscriber sees zero or more rows followed by at most one terminal signal. When the
/// execution is cancelled before it terminates, no terminal signal is sent at all.
pub trait Subscriber: Send + 'static {
    fn on_next(&mut self, row: CustomDbRow);

    fn on_error(&mut self, error: SelectStreamError);

    fn on_completed(&mut self);
}

impl<T: Subscriber + ?Sized> Subscriber for Box<T> {
    fn on_next(&mut self, row: CustomDbRow) {
        (**self).on_next(row);
    }

    fn on_error(&mut self, error: SelectStreamError) {
        (**self).on_error(error);
    }

    fn on_completed(&mut self) {
        (**self).on_completed();
    }
}

/// Wraps a subscriber and drops any signal that would break the protocol.
///
/// Once a terminal signal has been delivered, or the execution has been silenced by
/// cancellation, nothing further reaches the inner subscriber.
pub(crate) struct GuardedSubscriber<Sub> {
    inner: Sub,
    closed: bool,
}

impl<Sub: Subscriber> GuardedSubscriber<Sub> {
    pub(crate) fn new(inner: Sub) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    /// Stop delivering anything, without a terminal signal.
    pub(crate) fn silence(&mut self) {
        self.closed = true;
    }

    pub(crate) fn next(&mut self, row: CustomDbRow) {
        if self.closed {
            warn!("dropping row delivered after the subscription closed");
            return;
        }
        self.inner.on_next(row);
    }

    pub(crate) fn error(&mut self, error: SelectStreamError) {
        if self.closed {
            warn!(error = %error, "dropping error delivered after the subscription closed");
            return;
        }
        self.closed = true;
        self.inner.on_error(error);
    }

    pub(crate) fn completed(&mut self) {
        if self.closed {
            warn!("dropping completion delivered after the subscription closed");
            return;
        }
        self.closed = true;
        self.inner.on_completed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::test_utils::{EventJournal, JournalEvent, RecordingSubscriber, id_row};

    #[test]
    fn guard_allows_a_single_terminal_signal() {
        let journal = EventJournal::new();
        let mut guarded = GuardedSubscriber::new(RecordingSubscriber::new(journal.clone()));

        guarded.next(id_row(1));
        guarded.completed();
        guarded.error(SelectStreamError::IterationError(DriverError::Other("late".into())));
        guarded.next(id_row(2));
        guarded.completed();

        assert_eq!(
            journal.signals(),
            vec![JournalEvent::Next(1), JournalEvent::Completed]
        );
    }

    #[test]
    fn silenced_guard_delivers_nothing() {
        let journal = EventJournal::new();
        let mut guarded = GuardedSubscriber::new(RecordingSubscriber::new(journal.clone()));

        guarded.silence();
        guarded.next(id_row(1));
        guarded.completed();

        assert!(journal.signals().is_empty());
    }
}
