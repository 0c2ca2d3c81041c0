use tracing::{debug, warn};

use crate::driver::{
    Acquired, CursorOf, PreparedQuery, ReleasePolicy, RowCursor, SourceConnection, StatementOf,
};

/// Owns the (connection, statement, cursor) triple of one execution.
///
/// Resources are attached one at a time as acquisition progresses, so a failure half way
/// through still leaves everything acquired so far reachable by [`ResourceHandle::release`].
pub(crate) struct ResourceHandle<C: SourceConnection> {
    connection: Option<C>,
    statement: Option<StatementOf<C>>,
    cursor: Option<CursorOf<C>>,
    policy: ReleasePolicy,
    released: bool,
}

impl<C: SourceConnection> ResourceHandle<C> {
    pub(crate) fn new() -> Self {
        Self {
            connection: None,
            statement: None,
            cursor: None,
            policy: ReleasePolicy::Close,
            released: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn attach_connection(&mut self, acquired: Acquired<C>) -> &mut C {
        debug_assert!(!self.released, "connection attached after release");
        self.policy = acquired.release;
        self.connection.insert(acquired.connection)
    }

    pub(crate) fn attach_statement(&mut self, statement: StatementOf<C>) -> &mut StatementOf<C> {
        debug_assert!(!self.released, "statement attached after release");
        self.statement.insert(statement)
    }

    pub(crate) fn attach_cursor(&mut self, cursor: CursorOf<C>) {
        debug_assert!(!self.released, "cursor attached after release");
        self.cursor = Some(cursor);
    }

    pub(crate) fn cursor_mut(&mut self) -> Option<&mut CursorOf<C>> {
        self.cursor.as_mut()
    }

    /// Release cursor, statement, then connection.
    ///
    /// Each close is attempted even if an earlier one failed; failures are logged and
    /// swallowed. Returns `true` only for the call that performed the release.
    pub(crate) fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        if let Some(cursor) = self.cursor.take() {
            match cursor.close() {
                Ok(()) => debug!("closed cursor"),
                Err(err) => warn!(error = %err, "failed to close cursor"),
            }
        }
        if let Some(statement) = self.statement.take() {
            match statement.close() {
                Ok(()) => debug!("closed statement"),
                Err(err) => warn!(error = %err, "failed to close statement"),
            }
        }
        if let Some(connection) = self.connection.take() {
            match self.policy {
                ReleasePolicy::Close => match connection.close() {
                    Ok(()) => debug!("closed connection"),
                    Err(err) => warn!(error = %err, "failed to close connection"),
                },
                ReleasePolicy::LeaveOpen => {
                    debug!("leaving caller-managed connection open");
                    drop(connection);
                }
            }
        }
        true
    }
}

impl<C: SourceConnection> Drop for ResourceHandle<C> {
    fn drop(&mut self) {
        if !self.released {
            debug!("releasing resources of an abandoned execution");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ConnectionSource;
    use crate::test_utils::{EventJournal, JournalEvent, Script, ScriptedSource};

    fn acquire_all(source: &ScriptedSource) -> ResourceHandle<crate::test_utils::ScriptedConnection> {
        let mut handle = ResourceHandle::new();
        let acquired = source.get().expect("scripted connection");
        let connection = handle.attach_connection(acquired);
        let statement = connection.prepare("SELECT id").expect("scripted statement");
        let statement = handle.attach_statement(statement);
        let cursor = statement.execute().expect("scripted cursor");
        handle.attach_cursor(cursor);
        handle
    }

    #[test]
    fn release_closes_in_order_once() {
        let journal = EventJournal::new();
        let source = ScriptedSource::new(Script::rows([1, 2]), journal.clone());
        let mut handle = acquire_all(&source);

        assert!(handle.release());
        assert!(!handle.release());
        assert!(handle.is_released());
        assert_eq!(
            journal.releases(),
            vec![
                JournalEvent::CursorClosed,
                JournalEvent::StatementClosed,
                JournalEvent::ConnectionClosed,
            ]
        );
    }

    #[test]
    fn failed_close_does_not_stop_the_chain() {
        let journal = EventJournal::new();
        let script = Script::rows([1])
            .failing_cursor_close()
            .failing_statement_close();
        let source = ScriptedSource::new(script, journal.clone());
        let mut handle = acquire_all(&source);

        assert!(handle.release());
        assert_eq!(journal.releases(), vec![JournalEvent::ConnectionClosed]);
    }

    #[test]
    fn caller_managed_connection_is_left_open() {
        let journal = EventJournal::new();
        let script = Script::rows([1]).with_release(ReleasePolicy::LeaveOpen);
        let source = ScriptedSource::new(script, journal.clone());
        let mut handle = acquire_all(&source);

        handle.release();
        assert_eq!(
            journal.releases(),
            vec![
                JournalEvent::CursorClosed,
                JournalEvent::StatementClosed,
                JournalEvent::ConnectionLeftOpen,
            ]
        );
    }

    #[test]
    fn dropping_an_unreleased_handle_releases_it() {
        let journal = EventJournal::new();
        let source = ScriptedSource::new(Script::rows([1]), journal.clone());
        drop(acquire_all(&source));
        assert_eq!(journal.releases().len(), 3);
    }
}
