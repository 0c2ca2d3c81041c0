use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;

use rusqlite::{Connection, InterruptHandle};

use crate::error::DriverError;

use super::channel::{Command, Reply};
use super::dispatcher::run_sqlite_worker;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to the thread that owns one `rusqlite::Connection`.
pub(in crate::sqlite) struct SqliteWorker {
    sender: Sender<Command>,
    interrupt: Arc<InterruptHandle>,
    id: u64,
}

impl SqliteWorker {
    pub(in crate::sqlite) fn spawn(conn: Connection) -> Result<Self, DriverError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let interrupt = Arc::new(conn.get_interrupt_handle());
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("sqlite-stream-worker-{id}"))
            .spawn(move || run_sqlite_worker(conn, &receiver))
            .map_err(|err| {
                DriverError::Other(format!("failed to spawn SQLite worker thread: {err}"))
            })?;

        Ok(Self {
            sender,
            interrupt,
            id,
        })
    }

    pub(in crate::sqlite) fn id(&self) -> u64 {
        self.id
    }

    pub(in crate::sqlite) fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        Arc::clone(&self.interrupt)
    }

    pub(in crate::sqlite) fn send_command(&self, command: Command) -> Result<(), DriverError> {
        self.sender
            .send(command)
            .map_err(|_| DriverError::Closed("SQLite worker".into()))
    }

    /// Send a command and block until the worker answers it.
    pub(in crate::sqlite) fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
        drop_message: &'static str,
    ) -> Result<T, DriverError> {
        let (tx, rx) = mpsc::channel();
        self.send_command(build(tx))?;
        rx.recv()
            .map_err(|_| DriverError::Closed(drop_message.into()))?
    }
}

impl Drop for SqliteWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}
