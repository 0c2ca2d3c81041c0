use std::fmt;
use std::time::Duration;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use sql_select_stream::ReleasePolicy;
use sql_select_stream::test_utils::Script;

use crate::args::SimConfig;

/// Where a scenario's driver misbehaves, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    None,
    Connect,
    Prepare,
    Bind,
    Execute,
    Advance(usize),
}

impl Fault {
    /// Whether a run that is never cancelled must end in `Failed`.
    pub(crate) fn fails(self, rows: usize) -> bool {
        match self {
            Fault::None => false,
            Fault::Advance(at) => at <= rows,
            _ => true,
        }
    }
}

/// Who cancels the execution, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CancelPlan {
    Never,
    /// Cancel completes before `drive` is called.
    BeforeStart,
    /// The subscriber cancels from inside `on_next` for the row with this index.
    FromSubscriber(usize),
    /// Each entry is one canceller thread and the delay after which it fires.
    Threads(Vec<Duration>),
}

#[derive(Debug, Clone)]
pub(crate) struct Scenario {
    pub(crate) rows: usize,
    pub(crate) fault: Fault,
    pub(crate) stall_at: Option<usize>,
    pub(crate) advance_delay: Duration,
    pub(crate) interruptible: bool,
    pub(crate) release: ReleasePolicy,
    pub(crate) failing_closes: bool,
    pub(crate) params: usize,
    pub(crate) cancel: CancelPlan,
}

impl Scenario {
    pub(crate) fn generate(config: &SimConfig, rng: &mut ChaCha8Rng) -> Self {
        let rows = rng.random_range(0..=config.max_rows);
        let fault = if rng.random_bool(config.setup_failure_rate) {
            match rng.random_range(0..4) {
                0 => Fault::Connect,
                1 => Fault::Prepare,
                2 => Fault::Bind,
                _ => Fault::Execute,
            }
        } else if rng.random_bool(config.advance_failure_rate) {
            Fault::Advance(rng.random_range(0..=rows))
        } else {
            Fault::None
        };
        let interruptible = !rng.random_bool(config.no_interrupt_rate);
        // A stall only ends early through an interrupt, so it needs one and a canceller.
        let stall_at = (interruptible && rng.random_bool(config.stall_rate))
            .then(|| rng.random_range(0..=rows));
        let release = if rng.random_bool(config.leave_open_rate) {
            ReleasePolicy::LeaveOpen
        } else {
            ReleasePolicy::Close
        };

        let cancel = if rng.random_bool(config.cancel_before_start_rate) {
            CancelPlan::BeforeStart
        } else if rows > 0 && stall_at.is_none() && rng.random_bool(config.subscriber_cancel_rate) {
            CancelPlan::FromSubscriber(rng.random_range(0..rows))
        } else if stall_at.is_some() || rng.random_bool(config.cancel_rate) {
            let threads = rng.random_range(1..=config.max_cancellers);
            CancelPlan::Threads(
                (0..threads)
                    .map(|_| Duration::from_micros(rng.random_range(0..=config.max_cancel_delay_us)))
                    .collect(),
            )
        } else {
            CancelPlan::Never
        };
        let params = if fault == Fault::Bind {
            rng.random_range(1..3)
        } else {
            rng.random_range(0..3)
        };

        Scenario {
            rows,
            fault,
            stall_at,
            advance_delay: Duration::from_micros(rng.random_range(0..=config.max_advance_delay_us)),
            interruptible,
            release,
            failing_closes: rng.random_bool(config.close_failure_rate),
            params,
            cancel,
        }
    }

    /// Row ids the cursor yields, in order.
    pub(crate) fn row_ids(&self) -> std::ops::Range<i64> {
        0..self.rows as i64
    }

    pub(crate) fn script(&self) -> Script {
        let mut script = Script::rows(self.row_ids())
            .with_release(self.release)
            .with_advance_delay(self.advance_delay);
        script = match self.fault {
            Fault::None => script,
            Fault::Connect => script.failing_connect(),
            Fault::Prepare => script.failing_prepare(),
            Fault::Bind => script.failing_bind(),
            Fault::Execute => script.failing_execute(),
            Fault::Advance(at) => script.failing_advance(at),
        };
        if let Some(at) = self.stall_at {
            script = script.stalling_at(at);
        }
        if !self.interruptible {
            script = script.without_interrupt();
        }
        if self.failing_closes {
            script = script.failing_cursor_close().failing_statement_close();
        }
        script
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows={} fault={:?} stall={:?} delay={:?} interrupt={} release={:?} bad_close={} params={} cancel={:?}",
            self.rows,
            self.fault,
            self.stall_at,
            self.advance_delay,
            self.interruptible,
            self.release,
            self.failing_closes,
            self.params,
            self.cancel
        )
    }
}
