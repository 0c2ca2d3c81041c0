//! Runs one blocking query execution and pushes its rows to a [`Subscriber`].
//!
//! One worker calls [`ExecutionBridge::drive`]; any number of other threads may call
//! [`ExecutionBridge::cancel`] (or a [`CancelHandle`]) at any time. A single re-entrant lock,
//! owned by this execution alone, totally orders the acquire, advance-and-emit, and release
//! critical sections of both sides. The `keep_going` flag lives under that lock with the
//! resources it guards.
//!
//! Cancellation is silent: the subscriber gets no terminal signal when cancel wins. Natural
//! exhaustion always ends with `on_completed`, and a failure always ends with `on_error`.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::driver::{
    ConnectionSource, Interrupt, ParameterBinder, PositionalBinder, PreparedQuery,
    QueryDescriptor, RowCursor, SourceConnection, StatementOf,
};
use crate::error::SelectStreamError;
use crate::handle::ResourceHandle;
use crate::subscriber::{GuardedSubscriber, Subscriber};
use crate::types::ParameterList;

/// Lifecycle of one execution. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExecutionState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

struct RunState<C: SourceConnection> {
    keep_going: bool,
    state: ExecutionState,
    params: Option<ParameterList>,
    handle: ResourceHandle<C>,
}

struct Protected<C: SourceConnection, Sub> {
    run: RefCell<RunState<C>>,
    subscriber: RefCell<GuardedSubscriber<Sub>>,
}

/// Written by `cancel()` before it waits for the shared lock, so that a worker blocked
/// inside the driver can be woken up.
#[derive(Default)]
struct OutOfBand {
    cancel_requested: bool,
    interrupter: Option<Arc<dyn Interrupt>>,
    hooks: Vec<Arc<dyn Interrupt>>,
}

struct Shared<C: SourceConnection, Sub> {
    lock: ReentrantMutex<Protected<C, Sub>>,
    out_of_band: Mutex<OutOfBand>,
}

impl<C: SourceConnection, Sub: Subscriber> Shared<C, Sub> {
    fn cancel_requested(&self) -> bool {
        self.out_of_band.lock().cancel_requested
    }

    fn cancel(&self) {
        let (interrupter, hooks) = {
            let mut oob = self.out_of_band.lock();
            oob.cancel_requested = true;
            (oob.interrupter.clone(), oob.hooks.clone())
        };
        if let Some(interrupter) = interrupter {
            debug!("interrupting in-flight statement");
            interrupter.interrupt();
        }
        for hook in hooks {
            hook.interrupt();
        }

        let guard = self.lock.lock();
        let mut run = guard.run.borrow_mut();
        self.cancel_locked(&mut run, &guard.subscriber);
    }

    /// Must be called with the shared lock held.
    fn cancel_locked(&self, run: &mut RunState<C>, subscriber: &RefCell<GuardedSubscriber<Sub>>) {
        run.keep_going = false;
        if run.handle.release() {
            debug!("released resources on cancel");
        }
        if !run.state.is_terminal() {
            debug!(from = ?run.state, "execution cancelled");
            run.state = ExecutionState::Cancelled;
            if let Ok(mut subscriber) = subscriber.try_borrow_mut() {
                subscriber.silence();
            }
        }
        self.out_of_band.lock().interrupter = None;
    }

    fn clear_interrupter(&self) {
        self.out_of_band.lock().interrupter = None;
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self);
}

impl<C: SourceConnection, Sub: Subscriber> Cancel for Shared<C, Sub> {
    fn cancel(&self) {
        Shared::cancel(self);
    }
}

/// Cancels the execution it was taken from. Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    target: Arc<dyn Cancel>,
}

impl CancelHandle {
    /// See [`ExecutionBridge::cancel`].
    pub fn cancel(&self) {
        self.target.cancel();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

/// Drives one execution end to end: acquire, execute, iterate, emit, terminate, release.
pub struct ExecutionBridge<S: ConnectionSource, Sub, B = PositionalBinder> {
    descriptor: QueryDescriptor<S>,
    binder: B,
    shared: Arc<Shared<S::Connection, Sub>>,
}

impl<S, Sub> ExecutionBridge<S, Sub, PositionalBinder>
where
    S: ConnectionSource,
    Sub: Subscriber,
{
    /// Build a bridge that binds parameters positionally.
    #[must_use]
    pub fn new(descriptor: QueryDescriptor<S>, params: ParameterList, subscriber: Sub) -> Self {
        Self::with_binder(descriptor, params, subscriber, PositionalBinder)
    }
}

impl<S, Sub, B> ExecutionBridge<S, Sub, B>
where
    S: ConnectionSource,
    Sub: Subscriber,
    B: ParameterBinder<StatementOf<S::Connection>>,
{
    #[must_use]
    pub fn with_binder(
        descriptor: QueryDescriptor<S>,
        params: ParameterList,
        subscriber: Sub,
        binder: B,
    ) -> Self {
        let protected = Protected {
            run: RefCell::new(RunState {
                keep_going: true,
                state: ExecutionState::NotStarted,
                params: Some(params),
                handle: ResourceHandle::new(),
            }),
            subscriber: RefCell::new(GuardedSubscriber::new(subscriber)),
        };
        Self {
            descriptor,
            binder,
            shared: Arc::new(Shared {
                lock: ReentrantMutex::new(protected),
                out_of_band: Mutex::new(OutOfBand::default()),
            }),
        }
    }

    /// A handle that cancels this execution, usable after the bridge moved to its worker.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        let target: Arc<dyn Cancel> = self.shared.clone();
        CancelHandle { target }
    }

    /// Register `hook` to fire on every `cancel()` before it waits for the shared lock.
    ///
    /// Lets a subscriber that blocks inside `on_next` on something other than the driver
    /// be woken by a canceller. Fires at once if a cancel was already requested.
    pub fn on_cancel(&self, hook: Arc<dyn Interrupt>) {
        let requested = {
            let mut oob = self.shared.out_of_band.lock();
            oob.hooks.push(Arc::clone(&hook));
            oob.cancel_requested
        };
        if requested {
            hook.interrupt();
        }
    }

    /// Current lifecycle state. Waits for any in-progress critical section.
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        let guard = self.shared.lock.lock();
        let state = guard.run.borrow().state;
        state
    }

    /// Stop the execution from any thread, any number of times.
    ///
    /// Clears the continue flag, releases whatever resources are held and moves a
    /// non-terminal execution to `Cancelled`. The subscriber is not notified. Resources are
    /// released before this returns. Calling it after the execution terminated is a no-op.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Run the execution on the calling thread until it completes, fails or is cancelled.
    ///
    /// Meant to be called once; later calls log a warning and return the current state.
    pub fn drive(&self) -> ExecutionState {
        {
            let guard = self.shared.lock.lock();
            let mut run = guard.run.borrow_mut();
            match run.state {
                ExecutionState::NotStarted => run.state = ExecutionState::Running,
                ExecutionState::Cancelled => {
                    debug!("cancelled before start");
                    return ExecutionState::Cancelled;
                }
                other => {
                    warn!(state = ?other, "drive called more than once");
                    return other;
                }
            }
        }

        let outcome = self
            .connect_and_execute()
            .and_then(|()| self.process_rows());
        match outcome {
            Ok(()) => self.complete(),
            Err(err) => self.fail(err),
        }
    }

    fn connect_and_execute(&self) -> Result<(), SelectStreamError> {
        let guard = self.shared.lock.lock();
        let mut run = guard.run.borrow_mut();
        let run = &mut *run;
        if !run.keep_going {
            return Ok(());
        }
        if self.shared.cancel_requested() {
            self.shared.cancel_locked(run, &guard.subscriber);
            return Ok(());
        }

        let sql = self.descriptor.sql();
        debug!(sql, "connecting");
        let params = run.params.take().unwrap_or_default();
        let acquired = self
            .descriptor
            .source()
            .get()
            .map_err(SelectStreamError::AcquisitionError)?;
        let connection = run.handle.attach_connection(acquired);
        let statement = connection
            .prepare(sql)
            .map_err(SelectStreamError::AcquisitionError)?;
        let statement = run.handle.attach_statement(statement);
        self.binder
            .bind(statement, &params)
            .map_err(SelectStreamError::BindingError)?;

        let interrupter = statement.interrupter();
        let cancelled = {
            let mut oob = self.shared.out_of_band.lock();
            oob.interrupter = interrupter;
            oob.cancel_requested
        };
        if cancelled {
            self.shared.cancel_locked(run, &guard.subscriber);
            return Ok(());
        }

        let cursor = statement
            .execute()
            .map_err(SelectStreamError::ExecutionError)?;
        run.handle.attach_cursor(cursor);
        debug!(sql, "executed");
        Ok(())
    }

    fn process_rows(&self) -> Result<(), SelectStreamError> {
        loop {
            let guard = self.shared.lock.lock();
            let row = {
                let mut run = guard.run.borrow_mut();
                let run = &mut *run;
                if !run.keep_going {
                    return Ok(());
                }
                if self.shared.cancel_requested() {
                    self.shared.cancel_locked(run, &guard.subscriber);
                    return Ok(());
                }
                let Some(cursor) = run.handle.cursor_mut() else {
                    run.keep_going = false;
                    return Ok(());
                };
                match cursor.advance().map_err(SelectStreamError::IterationError)? {
                    Some(row) => row,
                    None => {
                        run.keep_going = false;
                        return Ok(());
                    }
                }
            };
            debug!("on_next");
            // Emitting under the lock keeps a concurrent cancel from releasing mid-row.
            guard.subscriber.borrow_mut().next(row);
        }
    }

    fn complete(&self) -> ExecutionState {
        let guard = self.shared.lock.lock();
        {
            let mut run = guard.run.borrow_mut();
            if self.shared.cancel_requested() {
                self.shared.cancel_locked(&mut run, &guard.subscriber);
            }
            if run.state != ExecutionState::Running {
                return run.state;
            }
            run.state = ExecutionState::Completed;
        }
        debug!("on_completed");
        guard.subscriber.borrow_mut().completed();
        guard.run.borrow_mut().handle.release();
        self.shared.clear_interrupter();
        ExecutionState::Completed
    }

    fn fail(&self, err: SelectStreamError) -> ExecutionState {
        let guard = self.shared.lock.lock();
        {
            let mut run = guard.run.borrow_mut();
            if self.shared.cancel_requested() {
                self.shared.cancel_locked(&mut run, &guard.subscriber);
            }
            if run.state != ExecutionState::Running {
                debug!(error = %err, "failure after cancellation suppressed");
                return run.state;
            }
            run.state = ExecutionState::Failed;
            run.keep_going = false;
            run.handle.release();
        }
        self.shared.clear_interrupter();
        debug!(error = %err, "on_error");
        guard.subscriber.borrow_mut().error(err);
        ExecutionState::Failed
    }
}

impl<S: ConnectionSource, Sub, B> fmt::Debug for ExecutionBridge<S, Sub, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionBridge")
            .field("sql", &self.descriptor.sql())
            .finish_non_exhaustive()
    }
}
