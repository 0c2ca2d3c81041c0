use sql_select_stream::test_utils::JournalEvent;
use sql_select_stream::{ExecutionState, ReleasePolicy, RowValues};

use crate::model::{CancelPlan, Fault, Scenario};

/// Everything observed while one scenario ran.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) state: ExecutionState,
    pub(crate) events: Vec<JournalEvent>,
    /// Journal as seen by each canceller right after its `cancel()` returned.
    pub(crate) after_cancel: Vec<Vec<JournalEvent>>,
    pub(crate) params: Vec<RowValues>,
    pub(crate) bound: Vec<RowValues>,
}

pub(crate) struct Oracle;

impl Oracle {
    pub(crate) fn check(scenario: &Scenario, outcome: &Outcome) -> Result<(), String> {
        let events = &outcome.events;
        Self::single_terminal(events)?;
        Self::no_row_after_release(events)?;
        Self::released_once(scenario, events)?;
        Self::released_before_cancel_returns(&outcome.after_cancel)?;
        Self::state_matches_signals(outcome.state, events)?;
        Self::rows_in_order(scenario, outcome.state, events)?;
        Self::expected_state(scenario, outcome)?;
        Ok(())
    }

    fn single_terminal(events: &[JournalEvent]) -> Result<(), String> {
        let signals: Vec<_> = events.iter().filter(|e| e.is_signal()).collect();
        if let Some(pos) = signals.iter().position(|e| e.is_terminal())
            && pos + 1 != signals.len()
        {
            return Err(format!(
                "signal after terminal signal: {:?}",
                &signals[pos..]
            ));
        }
        Ok(())
    }

    fn no_row_after_release(events: &[JournalEvent]) -> Result<(), String> {
        if let Some(first_release) = events.iter().position(JournalEvent::is_release)
            && let Some(row) = events[first_release..]
                .iter()
                .find(|e| matches!(e, JournalEvent::Next(_)))
        {
            return Err(format!("{row:?} delivered after release began"));
        }
        Ok(())
    }

    fn released_once(scenario: &Scenario, events: &[JournalEvent]) -> Result<(), String> {
        for kind in [
            JournalEvent::Acquired,
            JournalEvent::CursorClosed,
            JournalEvent::StatementClosed,
            JournalEvent::ConnectionClosed,
            JournalEvent::ConnectionLeftOpen,
        ] {
            let count = events.iter().filter(|e| **e == kind).count();
            if count > 1 {
                return Err(format!("{kind:?} happened {count} times"));
            }
        }

        let acquired = events.contains(&JournalEvent::Acquired);
        let expected = match scenario.release {
            ReleasePolicy::Close => JournalEvent::ConnectionClosed,
            ReleasePolicy::LeaveOpen => JournalEvent::ConnectionLeftOpen,
        };
        if acquired != events.contains(&expected) {
            return Err(format!(
                "acquired={acquired} but connection release {expected:?} present={}",
                !acquired
            ));
        }
        let releases: Vec<_> = events.iter().filter(|e| e.is_release()).collect();
        let order = |event: &JournalEvent| match event {
            JournalEvent::CursorClosed => 0,
            JournalEvent::StatementClosed => 1,
            _ => 2,
        };
        if releases.windows(2).any(|pair| order(pair[0]) > order(pair[1])) {
            return Err(format!("release out of order: {releases:?}"));
        }
        Ok(())
    }

    fn released_before_cancel_returns(after_cancel: &[Vec<JournalEvent>]) -> Result<(), String> {
        for snapshot in after_cancel {
            let acquired = snapshot.contains(&JournalEvent::Acquired);
            let connection_released = snapshot.iter().any(|e| {
                matches!(
                    e,
                    JournalEvent::ConnectionClosed | JournalEvent::ConnectionLeftOpen
                )
            });
            if acquired && !connection_released {
                return Err(format!(
                    "cancel returned with resources still held: {snapshot:?}"
                ));
            }
        }
        Ok(())
    }

    fn state_matches_signals(state: ExecutionState, events: &[JournalEvent]) -> Result<(), String> {
        let terminal = events.iter().find(|e| e.is_terminal());
        let consistent = match state {
            ExecutionState::Completed => matches!(terminal, Some(JournalEvent::Completed)),
            ExecutionState::Failed => matches!(terminal, Some(JournalEvent::Error(_))),
            ExecutionState::Cancelled => terminal.is_none(),
            ExecutionState::NotStarted | ExecutionState::Running => false,
        };
        if consistent {
            Ok(())
        } else {
            Err(format!("final state {state:?} with terminal signal {terminal:?}"))
        }
    }

    fn rows_in_order(
        scenario: &Scenario,
        state: ExecutionState,
        events: &[JournalEvent],
    ) -> Result<(), String> {
        let delivered: Vec<i64> = events
            .iter()
            .filter_map(|e| match e {
                JournalEvent::Next(id) => Some(*id),
                _ => None,
            })
            .collect();
        let expected: Vec<i64> = scenario.row_ids().collect();
        if !expected.starts_with(&delivered) {
            return Err(format!("rows {delivered:?} are not a prefix of {expected:?}"));
        }

        match state {
            ExecutionState::Completed => {
                if delivered != expected {
                    return Err(format!("completed after {delivered:?}, cursor had {expected:?}"));
                }
                let completed = events.iter().position(|e| *e == JournalEvent::Completed);
                let first_release = events.iter().position(JournalEvent::is_release);
                if let (Some(completed), Some(release)) = (completed, first_release)
                    && release < completed
                {
                    return Err("released before on_completed".to_string());
                }
            }
            ExecutionState::Failed => {
                let error = events.iter().position(|e| matches!(e, JournalEvent::Error(_)));
                let last_release = events.iter().rposition(JournalEvent::is_release);
                if let (Some(error), Some(release)) = (error, last_release)
                    && release > error
                {
                    return Err("on_error delivered before release finished".to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn expected_state(scenario: &Scenario, outcome: &Outcome) -> Result<(), String> {
        let fails = scenario.fault.fails(scenario.rows);
        let expected = match &scenario.cancel {
            CancelPlan::BeforeStart => {
                if !outcome.events.is_empty() {
                    return Err(format!(
                        "cancelled before start yet observed {:?}",
                        outcome.events
                    ));
                }
                Some(ExecutionState::Cancelled)
            }
            CancelPlan::Never if fails => Some(ExecutionState::Failed),
            CancelPlan::Never => Some(ExecutionState::Completed),
            CancelPlan::FromSubscriber(at) => match scenario.fault {
                Fault::None => Some(ExecutionState::Cancelled),
                Fault::Advance(step) if step > *at => Some(ExecutionState::Cancelled),
                _ => Some(ExecutionState::Failed),
            },
            CancelPlan::Threads(_) => None,
        };
        if let Some(expected) = expected
            && expected != outcome.state
        {
            return Err(format!("expected {expected:?}, finished {:?}", outcome.state));
        }
        if outcome.state == ExecutionState::Completed && outcome.bound != outcome.params {
            return Err(format!(
                "bound {:?}, expected {:?}",
                outcome.bound, outcome.params
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use JournalEvent::{
        Acquired, Completed, ConnectionClosed, CursorClosed, Error, Next, StatementClosed,
    };

    fn scenario(rows: usize, cancel: CancelPlan) -> Scenario {
        Scenario {
            rows,
            fault: Fault::None,
            stall_at: None,
            advance_delay: Duration::ZERO,
            interruptible: true,
            release: ReleasePolicy::Close,
            failing_closes: false,
            params: 0,
            cancel,
        }
    }

    fn outcome(state: ExecutionState, events: Vec<JournalEvent>) -> Outcome {
        Outcome {
            state,
            events,
            after_cancel: Vec::new(),
            params: Vec::new(),
            bound: Vec::new(),
        }
    }

    #[test]
    fn accepts_a_clean_exhaustion() {
        let events = vec![
            Acquired,
            Next(0),
            Next(1),
            Completed,
            CursorClosed,
            StatementClosed,
            ConnectionClosed,
        ];
        let result = Oracle::check(
            &scenario(2, CancelPlan::Never),
            &outcome(ExecutionState::Completed, events),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn rejects_a_terminal_signal_after_cancel() {
        let events = vec![Acquired, Next(0), CursorClosed, StatementClosed, ConnectionClosed, Completed];
        let result = Oracle::check(
            &scenario(2, CancelPlan::Threads(vec![Duration::ZERO])),
            &outcome(ExecutionState::Cancelled, events),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_a_row_after_release() {
        let events = vec![Acquired, CursorClosed, Next(0), StatementClosed, ConnectionClosed];
        let result = Oracle::check(
            &scenario(1, CancelPlan::Threads(vec![Duration::ZERO])),
            &outcome(ExecutionState::Cancelled, events),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_error_before_release() {
        let mut failing = scenario(1, CancelPlan::Never);
        failing.fault = Fault::Advance(1);
        let events = vec![
            Acquired,
            Next(0),
            Error("Iteration error: boom".into()),
            CursorClosed,
            StatementClosed,
            ConnectionClosed,
        ];
        let result = Oracle::check(&failing, &outcome(ExecutionState::Failed, events));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_a_cancel_that_returns_holding_resources() {
        let mut observed = outcome(
            ExecutionState::Cancelled,
            vec![Acquired, CursorClosed, StatementClosed, ConnectionClosed],
        );
        observed.after_cancel = vec![vec![Acquired]];
        let result = Oracle::check(
            &scenario(3, CancelPlan::Threads(vec![Duration::ZERO])),
            &observed,
        );
        assert!(result.is_err());
    }
}
