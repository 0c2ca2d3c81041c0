use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use rand_chacha::ChaCha8Rng;
use sql_select_stream::test_utils::{EventJournal, RecordingSubscriber, ScriptedSource};
use sql_select_stream::{CancelHandle, ExecutionBridge, ExecutionState, QueryDescriptor, RowValues};

use crate::args::SimConfig;
use crate::logging::EventLog;
use crate::model::{CancelPlan, Scenario};
use crate::oracle::{Oracle, Outcome};

pub(crate) fn run(config: SimConfig, rng: &mut ChaCha8Rng) {
    let mut events = EventLog::new(config.first_steps, config.tail_steps);
    let max_steps = config.iterations.unwrap_or(u64::MAX);
    let max_time = config.duration_ms.unwrap_or(u64::MAX);
    let started = Instant::now();

    let mut step: u64 = 0;
    let mut cancelled: u64 = 0;
    while step < max_steps && (started.elapsed().as_millis() as u64) <= max_time {
        let scenario = Scenario::generate(&config, rng);
        let outcome = execute(&scenario);
        if outcome.state == ExecutionState::Cancelled {
            cancelled += 1;
        }
        events.record(format!(
            "step={} {} -> {:?} journal={:?}",
            step, scenario, outcome.state, outcome.events
        ));

        if let Err(reason) = Oracle::check(&scenario, &outcome) {
            events.dump_failure(&reason);
            std::process::exit(1);
        }
        step += 1;
        if step % 1_000 == 0 {
            tracing::info!("progress: steps={} cancelled={}", step, cancelled);
        }
    }

    tracing::info!(
        "complete: steps={} cancelled={} time={}ms recorded={}",
        step,
        cancelled,
        started.elapsed().as_millis(),
        events.recorded()
    );
}

/// Drive one scenario on this thread while its cancellers race it on their own threads.
fn execute(scenario: &Scenario) -> Outcome {
    let journal = EventJournal::new();
    let source = Arc::new(ScriptedSource::new(scenario.script(), journal.clone()));
    let query = QueryDescriptor::new("SELECT id FROM sim_rows", Arc::clone(&source));
    let params: Vec<RowValues> = (0..scenario.params)
        .map(|i| RowValues::Int(i as i64))
        .collect();

    // Cleared after the run: the handle inside the hook would otherwise keep the bridge alive.
    let slot: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
    let mut subscriber = RecordingSubscriber::new(journal.clone());
    if let CancelPlan::FromSubscriber(at) = scenario.cancel {
        let slot = Arc::clone(&slot);
        let target = at as i64;
        subscriber = subscriber.with_row_hook(move |row| {
            let id = row.get("id").and_then(RowValues::as_int).copied();
            if id != Some(target) {
                return;
            }
            let cancel = slot.lock().ok().and_then(|handle| handle.clone());
            if let Some(cancel) = cancel {
                cancel.cancel();
            }
        });
    }
    let bridge = ExecutionBridge::new(query, params.clone(), subscriber);
    if let Ok(mut handle) = slot.lock() {
        *handle = Some(bridge.cancel_handle());
    }

    let mut after_cancel = Vec::new();
    if scenario.cancel == CancelPlan::BeforeStart {
        bridge.cancel();
        after_cancel.push(journal.events());
    }

    let state = thread::scope(|scope| {
        let cancellers: Vec<_> = match &scenario.cancel {
            CancelPlan::Threads(delays) => delays
                .iter()
                .map(|delay| {
                    let bridge = &bridge;
                    let journal = &journal;
                    scope.spawn(move || {
                        thread::sleep(*delay);
                        bridge.cancel();
                        journal.events()
                    })
                })
                .collect(),
            _ => Vec::new(),
        };
        let state = bridge.drive();
        for canceller in cancellers {
            match canceller.join() {
                Ok(snapshot) => after_cancel.push(snapshot),
                Err(_) => tracing::error!("canceller thread panicked"),
            }
        }
        state
    });

    if let Ok(mut handle) = slot.lock() {
        handle.take();
    }
    // Drop the bridge so an unreleased handle would show up in the journal.
    drop(bridge);
    Outcome {
        state,
        events: journal.events(),
        after_cancel,
        params,
        bound: source.bound_params(),
    }
}
