// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Adaptive sampler — polls host counters for up to one second and reduces
//! them to a single load report
//!
//! The polling interval tunes itself between ticks: it halves while the host
//! looks busy or the load is swinging, and stretches while everything is quiet.
//! Two stop conditions race: convergence (checked after every tick) and a hard
//! deadline armed at entry. Whichever resolves first drops the other.

use serde::{Serialize, Serializer};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::counters::{CounterSnapshot, CounterSource, NetworkCounters, SampleError};
use super::delta;
use super::history::RollingHistory;

pub const INITIAL_INTERVAL_MS: f64 = 100.0;
pub const MIN_INTERVAL_MS: f64 = 50.0;
pub const MAX_INTERVAL_MS: f64 = 200.0;

/// Hard upper bound on a sample run
pub const RUN_DURATION: Duration = Duration::from_millis(1000);

/// A percentage, or an explicit marker when no coherent value exists
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Percentage {
    Measured(f64),
    Unavailable,
}

impl Percentage {
    pub fn value(&self) -> Option<f64> {
        match self {
            Percentage::Measured(v) => Some(*v),
            Percentage::Unavailable => None,
        }
    }
}

impl From<Option<f64>> for Percentage {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Percentage::Unavailable, Percentage::Measured)
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Percentage::Measured(v) => serializer.serialize_f64(*v),
            Percentage::Unavailable => serializer.serialize_str("N/A"),
        }
    }
}

/// Which stop condition resolved the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Converged,
    ForcedTimeout,
}

/// Outcome of one sample run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub stop: StopReason,
    pub highest_load: f64,
    pub average_load: Percentage,
    pub load_sequence: Vec<f64>,
    pub disk_usage_percent: Percentage,
    pub user_cpu_percent: Percentage,
    pub sys_cpu_percent: Percentage,
}

/// Inputs to the interval controller for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSignals {
    pub cpu_load: f64,
    pub memory_percent: f64,
    pub network_mib: f64,
    pub disk_percent: f64,
    pub load_change: f64,
}

impl LoadSignals {
    fn is_pressured(&self) -> bool {
        self.cpu_load > 80.0
            || self.memory_percent > 80.0
            || self.network_mib > 10.0
            || self.disk_percent > 80.0
            || self.load_change > 10.0
    }

    fn is_quiet(&self) -> bool {
        self.cpu_load < 20.0
            && self.memory_percent < 20.0
            && self.network_mib < 1.0
            && self.disk_percent < 20.0
            && self.load_change < 5.0
    }
}

/// Next polling interval in milliseconds. Pressure wins over quiet; anything
/// in between leaves the interval alone.
pub fn next_interval(current_ms: f64, signals: &LoadSignals) -> f64 {
    if signals.is_pressured() {
        (current_ms / 2.0).max(MIN_INTERVAL_MS)
    } else if signals.is_quiet() {
        (current_ms * 1.5).min(MAX_INTERVAL_MS)
    } else {
        current_ms
    }
}

/// Everything one tick produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReading {
    pub load: f64,
    pub memory_percent: f64,
    pub network_mib: f64,
    pub disk_percent: f64,
    pub user_percent: f64,
    pub sys_percent: f64,
    /// Interval chosen for the following tick
    pub interval_ms: f64,
}

/// Control-loop state for a single sample run.
///
/// The network baseline belongs to the run: it starts as the entry snapshot
/// and is replaced by every tick, so concurrent runs never share it.
#[derive(Debug)]
pub struct PollingState {
    interval_ms: f64,
    previous_load: f64,
    highest_load: f64,
    history: RollingHistory,
    network_baseline: NetworkCounters,
    last_tick: Option<TickReading>,
}

impl PollingState {
    pub fn new(network_baseline: NetworkCounters) -> Self {
        Self {
            interval_ms: INITIAL_INTERVAL_MS,
            previous_load: 0.0,
            highest_load: 0.0,
            history: RollingHistory::new(),
            network_baseline,
            last_tick: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros((self.interval_ms * 1000.0).round() as u64)
    }

    /// Fold one new snapshot into the state. CPU deltas are always taken
    /// against the run's entry snapshot; network deltas against the
    /// previous tick.
    pub fn apply_tick(&mut self, start: &CounterSnapshot, end: CounterSnapshot, memory_percent: f64) -> TickReading {
        let cpu = delta::cpu_delta(&start.cores, &end.cores);
        let network_mib = delta::network_delta(&self.network_baseline, &end.network).load_mib();
        let disk_percent = delta::disk_usage_percent(&end.disk);
        self.network_baseline = end.network;

        self.highest_load = self.highest_load.max(cpu.load);
        self.history.push(cpu.load);

        let load_change = (cpu.load - self.previous_load).abs();
        self.previous_load = cpu.load;

        self.interval_ms = next_interval(self.interval_ms, &LoadSignals {
            cpu_load: cpu.load,
            memory_percent,
            network_mib,
            disk_percent,
            load_change,
        });

        let reading = TickReading {
            load: cpu.load,
            memory_percent,
            network_mib,
            disk_percent,
            user_percent: cpu.user_percent,
            sys_percent: cpu.sys_percent,
            interval_ms: self.interval_ms,
        };
        trace!(
            load = reading.load,
            memory = memory_percent,
            network_mib,
            disk = disk_percent,
            since_entry_ms = end.taken_at.duration_since(start.taken_at).as_millis() as u64,
            next_interval_ms = self.interval_ms,
            "sampler tick"
        );
        self.last_tick = Some(reading);
        reading
    }

    /// Build the report for whichever stop condition fired. A forced
    /// timeout has no coherent last tick, so its per-tick figures are
    /// reported as unavailable.
    pub fn report(&self, stop: StopReason) -> Report {
        let last = match stop {
            StopReason::Converged => self.last_tick,
            StopReason::ForcedTimeout => None,
        };
        Report {
            stop,
            highest_load: self.highest_load,
            average_load: self.history.mean().into(),
            load_sequence: self.history.samples(),
            disk_usage_percent: last.map(|t| t.disk_percent).into(),
            user_cpu_percent: last.map(|t| t.user_percent).into(),
            sys_cpu_percent: last.map(|t| t.sys_percent).into(),
        }
    }
}

/// Run one sample against `source`. Always returns within `RUN_DURATION`
/// of entry; fails only if reading the host counters fails.
pub async fn sample<S: CounterSource>(source: &mut S) -> Result<Report, SampleError> {
    let started = Instant::now();
    let deadline = started + RUN_DURATION;

    let start = match tokio::time::timeout_at(deadline, source.snapshot()).await {
        Ok(snapshot) => snapshot?,
        Err(_) => {
            warn!("Initial counter snapshot did not complete before the deadline");
            return Ok(PollingState::new(NetworkCounters::new()).report(StopReason::ForcedTimeout));
        }
    };
    let mut state = PollingState::new(start.network.clone());

    // Only one branch can complete; the other future is dropped along with
    // its timer when the select returns.
    let resolved = tokio::select! {
        biased;
        ticks = tick_loop(source, &start, &mut state, started) => ticks.map(|_| StopReason::Converged),
        _ = tokio::time::sleep_until(deadline) => Ok(StopReason::ForcedTimeout),
    };

    let stop = match resolved {
        Ok(stop) => stop,
        Err(e) => {
            warn!("Sample run failed after {} ticks: {}", state.history.len(), e);
            return Err(e);
        }
    };

    let report = state.report(stop);
    debug!(
        ?stop,
        ticks = report.load_sequence.len(),
        highest = report.highest_load,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "sample run resolved"
    );
    Ok(report)
}

/// Poll until the run has been going for `RUN_DURATION`. The last tick is
/// pulled in to land on the deadline instead of overshooting it.
async fn tick_loop<S: CounterSource>(
    source: &mut S,
    start: &CounterSnapshot,
    state: &mut PollingState,
    started: Instant,
) -> Result<(), SampleError> {
    let deadline = started + RUN_DURATION;
    loop {
        let next = (Instant::now() + state.interval()).min(deadline);
        tokio::time::sleep_until(next).await;

        let end = source.snapshot().await?;
        let memory = source.memory_percent().await?;
        state.apply_tick(start, end, memory);

        if started.elapsed() >= RUN_DURATION {
            return Ok(());
        }
    }
}
