mod channel;
mod dispatcher;
mod manager;

pub(super) use channel::{Command, CursorRequest, StatementInfo};
pub(super) use manager::SqliteWorker;
