use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

use rusqlite::types::Value;

use crate::error::DriverError;
use crate::types::RowValues;

pub(in crate::sqlite) type Reply<T> = Sender<Result<T, DriverError>>;

/// What the worker learns about a statement when preparing it.
#[derive(Debug, Clone)]
pub(in crate::sqlite) struct StatementInfo {
    pub(in crate::sqlite) parameter_count: usize,
    pub(in crate::sqlite) columns: Vec<String>,
}

pub(in crate::sqlite) enum Command {
    ExecuteBatch {
        query: String,
        respond_to: Reply<()>,
    },
    ExecuteDml {
        query: String,
        params: Vec<Value>,
        respond_to: Reply<usize>,
    },
    Prepare {
        query: Arc<str>,
        respond_to: Reply<StatementInfo>,
    },
    /// Run a query and then serve `requests` until the cursor is closed.
    OpenCursor {
        query: Arc<str>,
        params: Vec<Value>,
        requests: Receiver<CursorRequest>,
        respond_to: Reply<Vec<String>>,
    },
    Close {
        respond_to: Reply<()>,
    },
    Shutdown,
}

pub(in crate::sqlite) enum CursorRequest {
    Next {
        respond_to: Reply<Option<Vec<RowValues>>>,
    },
    Close {
        respond_to: Sender<()>,
    },
}
