#![cfg(feature = "sqlite")]

use std::error::Error;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use sql_select_stream::prelude::*;
use tempfile::TempDir;

enum Signal {
    Row(CustomDbRow),
    Error(SelectStreamError),
    Completed,
}

struct ChannelSink(Sender<Signal>);

impl Subscriber for ChannelSink {
    fn on_next(&mut self, row: CustomDbRow) {
        let _ = self.0.send(Signal::Row(row));
    }

    fn on_error(&mut self, error: SelectStreamError) {
        let _ = self.0.send(Signal::Error(error));
    }

    fn on_completed(&mut self) {
        let _ = self.0.send(Signal::Completed);
    }
}

fn sink() -> (ChannelSink, Receiver<Signal>) {
    let (tx, rx) = mpsc::channel();
    (ChannelSink(tx), rx)
}

fn seeded_db() -> Result<(TempDir, String), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stream.db").to_string_lossy().into_owned();
    let conn = SqliteOptionsBuilder::new(path.clone()).connect()?;
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB);
         INSERT INTO users (id, name, score, avatar) VALUES
             (1, 'alice', 9.5, x'00ff'),
             (2, 'bob', NULL, NULL),
             (3, 'carol', 7.25, NULL);",
    )?;
    Ok((dir, path))
}

fn run(
    source: SqliteSource,
    sql: &str,
    params: ParameterList,
) -> (ExecutionState, Vec<Signal>) {
    let (subscriber, rx) = sink();
    let bridge = ExecutionBridge::new(QueryDescriptor::new(sql, Arc::new(source)), params, subscriber);
    let state = bridge.drive();
    drop(bridge);
    (state, rx.iter().collect())
}

fn rows(signals: &[Signal]) -> Vec<&CustomDbRow> {
    signals
        .iter()
        .filter_map(|s| match s {
            Signal::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn count_users(source: SqliteSource) -> i64 {
    let (state, signals) = run(source, "SELECT count(*) AS n FROM users", vec![]);
    assert_eq!(state, ExecutionState::Completed);
    *rows(&signals)[0]
        .get("n")
        .and_then(RowValues::as_int)
        .expect("count column")
}

#[test]
fn streams_rows_with_bound_parameter() -> Result<(), Box<dyn Error>> {
    let (_dir, path) = seeded_db()?;
    let source = SqliteOptionsBuilder::new(path).build_source()?;

    let (state, signals) = run(
        source,
        "SELECT id, name, score, avatar FROM users WHERE id > ?1 ORDER BY id",
        vec![RowValues::Int(1)],
    );

    assert_eq!(state, ExecutionState::Completed);
    assert!(matches!(signals.last(), Some(Signal::Completed)));
    let rows = rows(&signals);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name").and_then(RowValues::as_text), Some("bob"));
    assert!(rows[0].get("score").is_some_and(RowValues::is_null));
    assert_eq!(rows[1].get("name").and_then(RowValues::as_text), Some("carol"));
    assert_eq!(rows[1].get("score").and_then(RowValues::as_float), Some(7.25));
    assert_eq!(rows[1].get_by_index(0), Some(&RowValues::Int(3)));
    Ok(())
}

#[test]
fn blob_and_real_columns_are_converted() -> Result<(), Box<dyn Error>> {
    let (_dir, path) = seeded_db()?;
    let source = SqliteSource::auto(SqliteOptions::new(path));

    let (state, signals) = run(
        source,
        "SELECT score, avatar FROM users WHERE name = ?1",
        vec![RowValues::Text("alice".into())],
    );

    assert_eq!(state, ExecutionState::Completed);
    let rows = rows(&signals);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("score").and_then(RowValues::as_float), Some(9.5));
    assert_eq!(
        rows[0].get("avatar").and_then(RowValues::as_blob),
        Some(&[0x00, 0xff][..])
    );
    Ok(())
}

#[test]
fn caller_managed_connection_stays_usable() -> Result<(), Box<dyn Error>> {
    let (_dir, path) = seeded_db()?;
    let conn = SqliteOptionsBuilder::new(path.clone()).connect()?;

    conn.execute_batch("BEGIN;")?;
    conn.execute_dml(
        "INSERT INTO users (id, name) VALUES (?1, ?2)",
        &[RowValues::Int(4), RowValues::Text("dave".into())],
    )?;
    let source = SqliteSource::caller_managed(conn.clone());
    assert_eq!(source.release_policy(), ReleasePolicy::LeaveOpen);
    // The uncommitted insert is visible on the caller's connection.
    assert_eq!(count_users(source), 4);

    conn.execute_batch("ROLLBACK;")?;
    assert_eq!(count_users(SqliteSource::caller_managed(conn)), 3);
    assert_eq!(count_users(SqliteSource::auto(SqliteOptions::new(path))), 3);
    Ok(())
}

#[test]
fn cancel_interrupts_a_long_running_query() -> Result<(), Box<dyn Error>> {
    let (_dir, path) = seeded_db()?;
    let source = Arc::new(SqliteOptionsBuilder::new(path).build_source()?);
    let (subscriber, rx) = sink();
    let sql = "WITH RECURSIVE counter(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM counter)
               SELECT count(*) FROM (SELECT x FROM counter LIMIT 50000000000)";
    let bridge = Arc::new(ExecutionBridge::new(
        QueryDescriptor::new(sql, source),
        vec![],
        subscriber,
    ));

    let worker = thread::spawn({
        let bridge = Arc::clone(&bridge);
        move || bridge.drive()
    });
    thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    bridge.cancel();
    assert!(started.elapsed() < Duration::from_secs(5));

    let state = worker.join().expect("driver thread panicked");
    assert_eq!(state, ExecutionState::Cancelled);
    drop(bridge);
    assert!(rx.iter().next().is_none(), "cancelled execution emitted a signal");
    Ok(())
}

#[test]
fn invalid_sql_is_an_acquisition_error() -> Result<(), Box<dyn Error>> {
    let (_dir, path) = seeded_db()?;
    let source = SqliteOptionsBuilder::new(path).build_source()?;

    let (state, signals) = run(source, "SELECT nope FROM missing_table", vec![]);

    assert_eq!(state, ExecutionState::Failed);
    assert_eq!(signals.len(), 1);
    assert!(matches!(
        &signals[0],
        Signal::Error(SelectStreamError::AcquisitionError(DriverError::SqliteError(_)))
    ));
    Ok(())
}

#[test]
fn extra_parameter_is_a_binding_error() -> Result<(), Box<dyn Error>> {
    let (_dir, path) = seeded_db()?;
    let source = SqliteOptionsBuilder::new(path).build_source()?;

    let (state, signals) = run(
        source,
        "SELECT id FROM users WHERE id = ?1",
        vec![RowValues::Int(1), RowValues::Int(2)],
    );

    assert_eq!(state, ExecutionState::Failed);
    assert!(matches!(
        signals.as_slice(),
        [Signal::Error(SelectStreamError::BindingError(DriverError::ParameterError(_)))]
    ));
    Ok(())
}

#[test]
fn missing_database_directory_fails_to_connect() {
    let source = SqliteSource::auto(SqliteOptions::new(
        "/nonexistent-dir/for/stream/tests.db".into(),
    ));
    let (state, signals) = run(source, "SELECT 1", vec![]);

    assert_eq!(state, ExecutionState::Failed);
    assert!(matches!(
        signals.as_slice(),
        [Signal::Error(SelectStreamError::AcquisitionError(_))]
    ));
}
