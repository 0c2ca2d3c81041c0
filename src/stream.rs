//! Async pull-style view of an execution.
//!
//! The bridge runs on tokio's blocking pool and pushes into a bounded channel, so a slow
//! consumer holds the worker back instead of buffering the whole result. Dropping the stream
//! unsubscribes: the execution is cancelled and no error is reported.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::bridge::{CancelHandle, ExecutionBridge, ExecutionState};
use crate::driver::{
    ConnectionSource, Interrupt, ParameterBinder, PositionalBinder, QueryDescriptor, StatementOf,
};
use crate::error::SelectStreamError;
use crate::results::CustomDbRow;
use crate::subscriber::Subscriber;
use crate::types::ParameterList;

enum StreamEvent {
    Row(CustomDbRow),
    Failed(SelectStreamError),
    Finished(ExecutionState),
}

/// Pushes rows into the channel from the blocking worker.
///
/// Sends wait under the bridge lock, so each one also watches `cancelled`: a canceller
/// trips the token before it asks for the lock, which frees a worker parked on a full
/// channel.
struct ChannelSubscriber {
    tx: mpsc::Sender<StreamEvent>,
    cancelled: CancellationToken,
    runtime: Handle,
}

impl ChannelSubscriber {
    fn send(&self, event: StreamEvent) -> bool {
        let (tx, cancelled) = (&self.tx, &self.cancelled);
        self.runtime.block_on(async move {
            tokio::select! {
                biased;
                () = cancelled.cancelled() => false,
                sent = tx.send(event) => sent.is_ok(),
            }
        })
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_next(&mut self, row: CustomDbRow) {
        if !self.send(StreamEvent::Row(row)) {
            debug!("stream cancelled or receiver gone, dropping row");
        }
    }

    fn on_error(&mut self, error: SelectStreamError) {
        if !self.send(StreamEvent::Failed(error)) {
            debug!("stream cancelled or receiver gone, dropping failure");
        }
    }

    fn on_completed(&mut self) {}
}

struct TokenHook(CancellationToken);

impl Interrupt for TokenHook {
    fn interrupt(&self) {
        self.0.cancel();
    }
}

/// Rows of one execution, received asynchronously.
pub struct SelectStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancelHandle,
    task: JoinHandle<()>,
    outcome: Option<ExecutionState>,
}

impl SelectStream {
    /// Start the execution on the blocking pool, buffering at most `capacity` rows.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<S>(descriptor: QueryDescriptor<S>, params: ParameterList, capacity: usize) -> Self
    where
        S: ConnectionSource + 'static,
    {
        Self::spawn_with_binder(descriptor, params, capacity, PositionalBinder)
    }

    #[must_use]
    pub fn spawn_with_binder<S, B>(
        descriptor: QueryDescriptor<S>,
        params: ParameterList,
        capacity: usize,
        binder: B,
    ) -> Self
    where
        S: ConnectionSource + 'static,
        B: ParameterBinder<StatementOf<S::Connection>> + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let done = tx.clone();
        let cancelled = CancellationToken::new();
        let subscriber = ChannelSubscriber {
            tx,
            cancelled: cancelled.clone(),
            runtime: Handle::current(),
        };
        let bridge = ExecutionBridge::with_binder(descriptor, params, subscriber, binder);
        bridge.on_cancel(Arc::new(TokenHook(cancelled)));
        let cancel = bridge.cancel_handle();
        let task = tokio::task::spawn_blocking(move || {
            let state = match catch_unwind(AssertUnwindSafe(|| bridge.drive())) {
                Ok(state) => state,
                Err(_) => {
                    error!("execution worker panicked");
                    let _ = done.blocking_send(StreamEvent::Failed(
                        SelectStreamError::ConnectionError("execution worker panicked".into()),
                    ));
                    ExecutionState::Failed
                }
            };
            let _ = done.blocking_send(StreamEvent::Finished(state));
        });
        Self {
            rx,
            cancel,
            task,
            outcome: None,
        }
    }

    /// Next row, then the failure if the execution failed, then `None`.
    ///
    /// A cancelled execution ends with `None` and no error.
    pub async fn next(&mut self) -> Option<Result<CustomDbRow, SelectStreamError>> {
        if self.outcome.is_some() {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamEvent::Row(row)) => Some(Ok(row)),
            Some(StreamEvent::Failed(err)) => Some(Err(err)),
            Some(StreamEvent::Finished(state)) => {
                self.outcome = Some(state);
                None
            }
            None => None,
        }
    }

    /// Drain the stream into a vector, stopping at the first error.
    ///
    /// # Errors
    /// Returns the execution's failure, if it failed.
    pub async fn collect(mut self) -> Result<Vec<CustomDbRow>, SelectStreamError> {
        let mut rows = Vec::new();
        while let Some(item) = self.next().await {
            rows.push(item?);
        }
        Ok(rows)
    }

    /// How the execution ended; known once [`SelectStream::next`] has returned `None`.
    #[must_use]
    pub fn outcome(&self) -> Option<ExecutionState> {
        self.outcome
    }

    /// Whether the worker has finished driving the execution.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the execution. Blocks only for the bridge's current critical section, and a
    /// row waiting for channel space is abandoned rather than waited for.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel the execution once `deadline` has elapsed.
    pub fn cancel_after(&self, deadline: Duration) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            debug!(?deadline, "deadline reached, cancelling execution");
            let _ = tokio::task::spawn_blocking(move || cancel.cancel()).await;
        })
    }
}

impl Drop for SelectStream {
    fn drop(&mut self) {
        // Nobody reads the final `Finished` event once the stream is gone.
        self.rx.close();
        if self.outcome.is_none() {
            self.cancel.cancel();
        }
    }
}
