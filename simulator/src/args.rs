use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic cancellation simulator for sql-select-stream")]
pub(crate) struct Args {
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    /// Largest result set a scenario's cursor yields.
    #[arg(long, default_value_t = 16)]
    pub(crate) max_rows: usize,
    /// Upper bound on the artificial latency of one cursor advance.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "200us")]
    pub(crate) max_advance_delay: Duration,
    /// Upper bound on how long a canceller waits before firing.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "2ms")]
    pub(crate) max_cancel_delay: Duration,
    #[arg(long, default_value_t = 4)]
    pub(crate) max_cancellers: usize,
    #[arg(long, default_value_t = 0.6)]
    pub(crate) cancel_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) cancel_before_start_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) subscriber_cancel_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) setup_failure_rate: f64,
    #[arg(long, default_value_t = 0.1)]
    pub(crate) advance_failure_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) close_failure_rate: f64,
    #[arg(long, default_value_t = 0.1)]
    pub(crate) stall_rate: f64,
    #[arg(long, default_value_t = 0.2)]
    pub(crate) no_interrupt_rate: f64,
    #[arg(long, default_value_t = 0.2)]
    pub(crate) leave_open_rate: f64,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) max_rows: usize,
    pub(crate) max_advance_delay_us: u64,
    pub(crate) max_cancel_delay_us: u64,
    pub(crate) max_cancellers: usize,
    pub(crate) cancel_rate: f64,
    pub(crate) cancel_before_start_rate: f64,
    pub(crate) subscriber_cancel_rate: f64,
    pub(crate) setup_failure_rate: f64,
    pub(crate) advance_failure_rate: f64,
    pub(crate) close_failure_rate: f64,
    pub(crate) stall_rate: f64,
    pub(crate) no_interrupt_rate: f64,
    pub(crate) leave_open_rate: f64,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_steps: usize,
    pub(crate) tail_steps: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut config = SimConfig {
            duration_ms: args.duration.map(|d| d.as_millis() as u64),
            iterations: args.iterations,
            seed: args.seed.unwrap_or_else(random_seed),
            max_rows: args.max_rows,
            max_advance_delay_us: args.max_advance_delay.as_micros() as u64,
            max_cancel_delay_us: args.max_cancel_delay.as_micros() as u64,
            max_cancellers: args.max_cancellers.max(1),
            cancel_rate: clamp_rate(args.cancel_rate),
            cancel_before_start_rate: clamp_rate(args.cancel_before_start_rate),
            subscriber_cancel_rate: clamp_rate(args.subscriber_cancel_rate),
            setup_failure_rate: clamp_rate(args.setup_failure_rate),
            advance_failure_rate: clamp_rate(args.advance_failure_rate),
            close_failure_rate: clamp_rate(args.close_failure_rate),
            stall_rate: clamp_rate(args.stall_rate),
            no_interrupt_rate: clamp_rate(args.no_interrupt_rate),
            leave_open_rate: clamp_rate(args.leave_open_rate),
            log: args.log,
            preset: None,
            first_steps: 20,
            tail_steps: 40,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(2_000);
        self.duration_ms = None;
        self.max_rows = 8;
        self.max_advance_delay_us = 100;
        self.max_cancel_delay_us = 1_000;
        self.max_cancellers = 2;
        self.stall_rate = 0.05;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.iterations = Some(50_000);
        self.duration_ms = None;
        self.max_rows = 64;
        self.max_advance_delay_us = 500;
        self.max_cancel_delay_us = 5_000;
        self.max_cancellers = 8;
        self.cancel_rate = 0.8;
        self.subscriber_cancel_rate = 0.1;
        self.advance_failure_rate = 0.15;
        self.close_failure_rate = 0.1;
        self.stall_rate = 0.15;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}
