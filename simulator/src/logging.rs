use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::writer::MakeWriter;

/// Tees formatted log lines to stdout and, optionally, a file.
#[derive(Clone)]
pub(crate) struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl LogWriter {
    pub(crate) fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let file = match path {
            Some(path) => Some(Arc::new(Mutex::new(File::create(path)?))),
            None => None,
        };
        Ok(Self { file })
    }
}

pub(crate) struct LogWriterGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            file: self.file.clone(),
        }
    }
}

fn lock_file(file: &Mutex<File>) -> io::Result<MutexGuard<'_, File>> {
    file.lock()
        .map_err(|_| io::Error::other("log file lock poisoned"))
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(file) = &self.file {
            lock_file(file)?.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = &self.file {
            lock_file(file)?.flush()?;
        }
        Ok(())
    }
}

/// Keeps the first and the most recent iteration lines so a failure can be replayed
/// from the log without recording every run.
pub(crate) struct EventLog {
    first: Vec<String>,
    tail: VecDeque<String>,
    first_limit: usize,
    tail_limit: usize,
    recorded: u64,
}

impl EventLog {
    pub(crate) fn new(first_limit: usize, tail_limit: usize) -> Self {
        Self {
            first: Vec::with_capacity(first_limit),
            tail: VecDeque::with_capacity(tail_limit),
            first_limit,
            tail_limit,
            recorded: 0,
        }
    }

    pub(crate) fn record(&mut self, line: String) {
        self.recorded += 1;
        if self.first.len() < self.first_limit {
            self.first.push(line);
            return;
        }
        if self.tail_limit == 0 {
            return;
        }
        if self.tail.len() == self.tail_limit {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }

    pub(crate) fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Write everything retained plus `reason` at error level.
    pub(crate) fn dump_failure(&self, reason: &str) {
        tracing::error!("property violated: {}", reason);
        tracing::error!("first {} iterations:", self.first.len());
        for line in &self.first {
            tracing::error!("  {}", line);
        }
        let skipped = self.recorded - (self.first.len() + self.tail.len()) as u64;
        if skipped > 0 {
            tracing::error!("  ... {} iterations omitted ...", skipped);
        }
        for line in &self.tail {
            tracing::error!("  {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_keeps_head_and_tail() {
        let mut log = EventLog::new(2, 3);
        for i in 0..10 {
            log.record(format!("iteration {i}"));
        }
        assert_eq!(log.recorded(), 10);
        assert_eq!(log.first, vec!["iteration 0", "iteration 1"]);
        assert_eq!(
            log.tail.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["iteration 7", "iteration 8", "iteration 9"]
        );
    }
}
