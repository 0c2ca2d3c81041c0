use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::driver::{
    Acquired, ConnectionSource, Interrupt, PreparedQuery, ReleasePolicy, RowCursor,
    SourceConnection,
};
use crate::error::DriverError;
use crate::results::{CustomDbRow, RowLayout};
use crate::types::RowValues;

use super::journal::{EventJournal, JournalEvent};

/// Upper bound on how long a stalled advance waits for an interrupt.
pub const STALL_LIMIT: Duration = Duration::from_secs(5);

/// What the scripted driver does at each step of an execution.
#[derive(Debug, Clone)]
pub struct Script {
    rows: Vec<i64>,
    release: ReleasePolicy,
    fail_connect: bool,
    fail_prepare: bool,
    fail_bind: bool,
    fail_execute: bool,
    fail_advance_at: Option<usize>,
    stall_at: Option<usize>,
    advance_delay: Duration,
    interruptible: bool,
    fail_cursor_close: bool,
    fail_statement_close: bool,
    fail_connection_close: bool,
}

impl Script {
    /// A cursor yielding one single-column `id` row per value.
    pub fn rows(rows: impl IntoIterator<Item = i64>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            release: ReleasePolicy::Close,
            fail_connect: false,
            fail_prepare: false,
            fail_bind: false,
            fail_execute: false,
            fail_advance_at: None,
            stall_at: None,
            advance_delay: Duration::ZERO,
            interruptible: true,
            fail_cursor_close: false,
            fail_statement_close: false,
            fail_connection_close: false,
        }
    }

    #[must_use]
    pub fn with_release(mut self, release: ReleasePolicy) -> Self {
        self.release = release;
        self
    }

    #[must_use]
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    #[must_use]
    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    #[must_use]
    pub fn failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    #[must_use]
    pub fn failing_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    /// Fail the advance call with 0-based index `at`.
    #[must_use]
    pub fn failing_advance(mut self, at: usize) -> Self {
        self.fail_advance_at = Some(at);
        self
    }

    /// Block the advance call with 0-based index `at` until interrupted (or [`STALL_LIMIT`]).
    #[must_use]
    pub fn stalling_at(mut self, at: usize) -> Self {
        self.stall_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = delay;
        self
    }

    /// Statements expose no interrupter, so cancel has to wait out every blocking call.
    #[must_use]
    pub fn without_interrupt(mut self) -> Self {
        self.interruptible = false;
        self
    }

    #[must_use]
    pub fn failing_cursor_close(mut self) -> Self {
        self.fail_cursor_close = true;
        self
    }

    #[must_use]
    pub fn failing_statement_close(mut self) -> Self {
        self.fail_statement_close = true;
        self
    }

    #[must_use]
    pub fn failing_connection_close(mut self) -> Self {
        self.fail_connection_close = true;
        self
    }
}

/// In-memory [`ConnectionSource`] that follows a [`Script`].
pub struct ScriptedSource {
    script: Arc<Script>,
    journal: EventJournal,
    acquisitions: AtomicUsize,
    bound: Arc<Mutex<Vec<RowValues>>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(script: Script, journal: EventJournal) -> Self {
        Self {
            script: Arc::new(script),
            journal,
            acquisitions: AtomicUsize::new(0),
            bound: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of connections handed out so far.
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Parameter values bound by the most recent execution, in index order.
    #[must_use]
    pub fn bound_params(&self) -> Vec<RowValues> {
        self.bound.lock().clone()
    }
}

impl ConnectionSource for ScriptedSource {
    type Connection = ScriptedConnection;

    fn get(&self) -> Result<Acquired<ScriptedConnection>, DriverError> {
        if self.script.fail_connect {
            return Err(DriverError::Other("scripted connect failure".into()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.journal.record(JournalEvent::Acquired);
        let connection = ScriptedConnection {
            script: Arc::clone(&self.script),
            journal: self.journal.clone(),
            bound: Arc::clone(&self.bound),
            closed: false,
        };
        Ok(Acquired::new(connection, self.script.release))
    }
}

pub struct ScriptedConnection {
    script: Arc<Script>,
    journal: EventJournal,
    bound: Arc<Mutex<Vec<RowValues>>>,
    closed: bool,
}

impl SourceConnection for ScriptedConnection {
    type Statement = ScriptedStatement;

    fn prepare(&mut self, _sql: &str) -> Result<ScriptedStatement, DriverError> {
        if self.script.fail_prepare {
            return Err(DriverError::Other("scripted prepare failure".into()));
        }
        self.bound.lock().clear();
        Ok(ScriptedStatement {
            script: Arc::clone(&self.script),
            journal: self.journal.clone(),
            bound: Arc::clone(&self.bound),
            interrupt: Arc::new(InterruptFlag::default()),
        })
    }

    fn close(mut self) -> Result<(), DriverError> {
        self.closed = true;
        if self.script.fail_connection_close {
            return Err(DriverError::Other("scripted connection close failure".into()));
        }
        self.journal.record(JournalEvent::ConnectionClosed);
        Ok(())
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.journal.record(JournalEvent::ConnectionLeftOpen);
        }
    }
}

pub struct ScriptedStatement {
    script: Arc<Script>,
    journal: EventJournal,
    bound: Arc<Mutex<Vec<RowValues>>>,
    interrupt: Arc<InterruptFlag>,
}

impl PreparedQuery for ScriptedStatement {
    type Cursor = ScriptedCursor;

    fn bind(&mut self, index: usize, value: &RowValues) -> Result<(), DriverError> {
        if self.script.fail_bind {
            return Err(DriverError::ParameterError(format!(
                "scripted bind failure at index {index}"
            )));
        }
        if index == 0 {
            return Err(DriverError::ParameterError("parameter indexes start at 1".into()));
        }
        let mut bound = self.bound.lock();
        if bound.len() < index {
            bound.resize(index, RowValues::Null);
        }
        bound[index - 1] = value.clone();
        Ok(())
    }

    fn execute(&mut self) -> Result<ScriptedCursor, DriverError> {
        if self.script.fail_execute {
            return Err(DriverError::Other("scripted execute failure".into()));
        }
        Ok(ScriptedCursor {
            script: Arc::clone(&self.script),
            journal: self.journal.clone(),
            interrupt: Arc::clone(&self.interrupt),
            layout: RowLayout::new(vec!["id".to_string()]),
            position: 0,
        })
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        if self.script.interruptible {
            let interrupter: Arc<dyn Interrupt> = self.interrupt.clone();
            Some(interrupter)
        } else {
            None
        }
    }

    fn close(self) -> Result<(), DriverError> {
        if self.script.fail_statement_close {
            return Err(DriverError::Other("scripted statement close failure".into()));
        }
        self.journal.record(JournalEvent::StatementClosed);
        Ok(())
    }
}

pub struct ScriptedCursor {
    script: Arc<Script>,
    journal: EventJournal,
    interrupt: Arc<InterruptFlag>,
    layout: RowLayout,
    position: usize,
}

impl RowCursor for ScriptedCursor {
    fn advance(&mut self) -> Result<Option<CustomDbRow>, DriverError> {
        let step = self.position;
        self.position += 1;

        if !self.script.advance_delay.is_zero() {
            self.interrupt.wait(self.script.advance_delay);
        }
        if self.script.stall_at == Some(step) {
            self.interrupt.wait(STALL_LIMIT);
        }
        if self.interrupt.is_set() {
            self.journal.record(JournalEvent::Interrupted);
            return Err(DriverError::Interrupted);
        }
        if self.script.fail_advance_at == Some(step) {
            return Err(DriverError::Other(format!("scripted advance failure at {step}")));
        }
        Ok(self
            .script
            .rows
            .get(step)
            .map(|id| CustomDbRow::with_layout(&self.layout, vec![RowValues::Int(*id)])))
    }

    fn close(self) -> Result<(), DriverError> {
        if self.script.fail_cursor_close {
            return Err(DriverError::Other("scripted cursor close failure".into()));
        }
        self.journal.record(JournalEvent::CursorClosed);
        Ok(())
    }
}

#[derive(Default)]
struct InterruptFlag {
    set: Mutex<bool>,
    changed: Condvar,
}

impl InterruptFlag {
    fn is_set(&self) -> bool {
        *self.set.lock()
    }

    fn wait(&self, limit: Duration) {
        let deadline = Instant::now() + limit;
        let mut set = self.set.lock();
        while !*set {
            if self.changed.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
    }
}

impl Interrupt for InterruptFlag {
    fn interrupt(&self) {
        *self.set.lock() = true;
        self.changed.notify_all();
    }
}
