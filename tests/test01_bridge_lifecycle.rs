use std::sync::Arc;

use sql_select_stream::driver::PreparedQuery;
use sql_select_stream::prelude::*;
use sql_select_stream::test_utils::{
    EventJournal, JournalEvent, RecordingSubscriber, Script, ScriptedSource, ScriptedStatement,
};

use JournalEvent::{
    Acquired, Completed, ConnectionClosed, ConnectionLeftOpen, CursorClosed, Next,
    StatementClosed,
};

fn bridge_for(
    script: Script,
    params: ParameterList,
) -> (
    ExecutionBridge<ScriptedSource, RecordingSubscriber>,
    Arc<ScriptedSource>,
    EventJournal,
) {
    let journal = EventJournal::new();
    let source = Arc::new(ScriptedSource::new(script, journal.clone()));
    let query = QueryDescriptor::new("SELECT id FROM items", Arc::clone(&source));
    let bridge = ExecutionBridge::new(query, params, RecordingSubscriber::new(journal.clone()));
    (bridge, source, journal)
}

fn error_event(message: &str) -> JournalEvent {
    JournalEvent::Error(message.to_string())
}

#[test]
fn exhausted_cursor_completes_then_releases() {
    let (bridge, source, journal) = bridge_for(Script::rows([1, 2, 3]), vec![]);

    assert_eq!(bridge.state(), ExecutionState::NotStarted);
    assert_eq!(bridge.drive(), ExecutionState::Completed);
    assert_eq!(bridge.state(), ExecutionState::Completed);
    assert_eq!(source.acquisitions(), 1);
    assert_eq!(
        journal.events(),
        vec![
            Acquired,
            Next(1),
            Next(2),
            Next(3),
            Completed,
            CursorClosed,
            StatementClosed,
            ConnectionClosed,
        ]
    );
}

#[test]
fn empty_result_completes_without_rows() {
    let (bridge, _source, journal) = bridge_for(Script::rows([]), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    assert_eq!(journal.signals(), vec![Completed]);
    assert_eq!(journal.releases().len(), 3);
}

#[test]
fn cancel_before_start_acquires_nothing() {
    let (bridge, source, journal) = bridge_for(Script::rows([1, 2, 3]), vec![]);

    bridge.cancel();
    bridge.cancel();
    assert_eq!(bridge.state(), ExecutionState::Cancelled);
    assert_eq!(bridge.drive(), ExecutionState::Cancelled);
    assert_eq!(source.acquisitions(), 0);
    assert!(journal.events().is_empty());
}

#[test]
fn advance_failure_releases_before_on_error() {
    let (bridge, _source, journal) = bridge_for(Script::rows([1, 2, 3]).failing_advance(1), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Failed);
    assert_eq!(
        journal.events(),
        vec![
            Acquired,
            Next(1),
            CursorClosed,
            StatementClosed,
            ConnectionClosed,
            error_event("Iteration error: scripted advance failure at 1"),
        ]
    );
    assert_eq!(journal.count(&Completed), 0);
}

#[test]
fn connect_failure_is_an_acquisition_error() {
    let (bridge, source, journal) = bridge_for(Script::rows([1]).failing_connect(), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Failed);
    assert_eq!(source.acquisitions(), 0);
    assert_eq!(
        journal.events(),
        vec![error_event("Acquisition error: scripted connect failure")]
    );
}

#[test]
fn prepare_failure_closes_the_connection() {
    let (bridge, _source, journal) = bridge_for(Script::rows([1]).failing_prepare(), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Failed);
    assert_eq!(
        journal.events(),
        vec![
            Acquired,
            ConnectionClosed,
            error_event("Acquisition error: scripted prepare failure"),
        ]
    );
}

#[test]
fn bind_failure_is_a_binding_error() {
    let (bridge, _source, journal) =
        bridge_for(Script::rows([1]).failing_bind(), vec![RowValues::Int(7)]);

    assert_eq!(bridge.drive(), ExecutionState::Failed);
    assert_eq!(
        journal.events(),
        vec![
            Acquired,
            StatementClosed,
            ConnectionClosed,
            error_event(
                "Binding error: Parameter binding error: scripted bind failure at index 1"
            ),
        ]
    );
}

#[test]
fn bind_is_skipped_without_parameters() {
    // A failing binder is never invoked when there is nothing to bind.
    let (bridge, _source, journal) = bridge_for(Script::rows([4]).failing_bind(), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    assert_eq!(journal.signals(), vec![Next(4), Completed]);
}

#[test]
fn execute_failure_is_an_execution_error() {
    let (bridge, _source, journal) = bridge_for(Script::rows([1]).failing_execute(), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Failed);
    assert_eq!(
        journal.events(),
        vec![
            Acquired,
            StatementClosed,
            ConnectionClosed,
            error_event("Execution error: scripted execute failure"),
        ]
    );
}

#[test]
fn parameters_are_bound_positionally() {
    let params = vec![RowValues::Int(7), RowValues::Text("seven".into()), RowValues::Null];
    let (bridge, source, _journal) = bridge_for(Script::rows([1]), params.clone());

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    assert_eq!(source.bound_params(), params);
}

struct ReversedBinder;

impl ParameterBinder<ScriptedStatement> for ReversedBinder {
    fn bind(
        &self,
        statement: &mut ScriptedStatement,
        params: &[RowValues],
    ) -> Result<(), DriverError> {
        for (i, value) in params.iter().rev().enumerate() {
            statement.bind(i + 1, value)?;
        }
        Ok(())
    }
}

#[test]
fn custom_binder_is_used() {
    let journal = EventJournal::new();
    let source = Arc::new(ScriptedSource::new(Script::rows([1]), journal.clone()));
    let query = QueryDescriptor::new("SELECT id FROM items", Arc::clone(&source));
    let bridge = ExecutionBridge::with_binder(
        query,
        vec![RowValues::Int(1), RowValues::Int(2)],
        RecordingSubscriber::new(journal),
        ReversedBinder,
    );

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    assert_eq!(
        source.bound_params(),
        vec![RowValues::Int(2), RowValues::Int(1)]
    );
}

#[test]
fn caller_managed_connection_is_not_closed() {
    let script = Script::rows([1, 2]).with_release(ReleasePolicy::LeaveOpen);
    let (bridge, _source, journal) = bridge_for(script, vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    assert_eq!(
        journal.releases(),
        vec![CursorClosed, StatementClosed, ConnectionLeftOpen]
    );
    assert_eq!(journal.count(&ConnectionClosed), 0);
}

#[test]
fn failed_close_still_completes() {
    let script = Script::rows([1]).failing_cursor_close().failing_connection_close();
    let (bridge, _source, journal) = bridge_for(script, vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    assert_eq!(journal.signals(), vec![Next(1), Completed]);
    assert_eq!(journal.releases(), vec![StatementClosed]);
}

#[test]
fn cancel_after_completion_changes_nothing() {
    let (bridge, _source, journal) = bridge_for(Script::rows([1, 2]), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    let before = journal.events();
    bridge.cancel();
    bridge.cancel_handle().cancel();

    assert_eq!(bridge.state(), ExecutionState::Completed);
    assert_eq!(journal.events(), before);
}

#[test]
fn cancel_after_failure_changes_nothing() {
    let (bridge, _source, journal) = bridge_for(Script::rows([1]).failing_execute(), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Failed);
    let before = journal.events();
    bridge.cancel();

    assert_eq!(bridge.state(), ExecutionState::Failed);
    assert_eq!(journal.events(), before);
}

#[test]
fn second_drive_returns_existing_state() {
    let (bridge, source, journal) = bridge_for(Script::rows([1]), vec![]);

    assert_eq!(bridge.drive(), ExecutionState::Completed);
    let before = journal.events();
    assert_eq!(bridge.drive(), ExecutionState::Completed);

    assert_eq!(source.acquisitions(), 1);
    assert_eq!(journal.events(), before);
}

#[test]
fn phase_errors_expose_the_driver_error() {
    let err = SelectStreamError::IterationError(DriverError::Interrupted);
    assert!(matches!(err.driver_error(), Some(DriverError::Interrupted)));
    assert!(SelectStreamError::ConfigError("bad".into()).driver_error().is_none());
}
