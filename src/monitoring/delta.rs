// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Delta engine — turns two counter snapshots into load percentages

use super::counters::{CoreTicks, DiskBlocks, NetworkCounters};

const MIB: f64 = 1024.0 * 1024.0;

/// CPU figures derived from two sets of per-core ticks
#[derive(Debug, Clone, PartialEq)]
pub struct CpuDelta {
    pub core_loads: Vec<f64>,
    /// Busiest core, not the mean: one saturated core must stay visible
    pub load: f64,
    pub user_percent: f64,
    pub sys_percent: f64,
}

/// Load of a single core between two readings.
///
/// A core that accumulated no ticks reports 0 rather than NaN.
pub fn core_load(start: &CoreTicks, end: &CoreTicks) -> f64 {
    let total = end.total.saturating_sub(start.total);
    if total == 0 {
        return 0.0;
    }
    let idle = end.idle.saturating_sub(start.idle);
    100.0 - (idle as f64 / total as f64 * 100.0)
}

/// Per-core loads plus the aggregate user/sys split.
///
/// Cores are paired by position. User and sys percentages come from the
/// summed deltas of all cores.
pub fn cpu_delta(start: &[CoreTicks], end: &[CoreTicks]) -> CpuDelta {
    let mut core_loads = Vec::with_capacity(end.len());
    let (mut user, mut sys, mut total) = (0u64, 0u64, 0u64);

    for (s, e) in start.iter().zip(end.iter()) {
        core_loads.push(core_load(s, e));
        user += e.user.saturating_sub(s.user);
        sys += e.sys.saturating_sub(s.sys);
        total += e.total.saturating_sub(s.total);
    }

    let load = core_loads.iter().copied().fold(0.0, f64::max);
    let share = |part: u64| if total == 0 { 0.0 } else { part as f64 / total as f64 * 100.0 };

    CpuDelta {
        load,
        user_percent: share(user),
        sys_percent: share(sys),
        core_loads,
    }
}

/// Bytes moved across all interfaces between two readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkDelta {
    pub sent: u64,
    pub received: u64,
}

impl NetworkDelta {
    /// Traffic in MiB
    pub fn load_mib(&self) -> f64 {
        (self.sent + self.received) as f64 / MIB
    }
}

/// Sum the traffic since `previous`. Interfaces that `previous` never saw
/// have no baseline and contribute nothing.
pub fn network_delta(previous: &NetworkCounters, current: &NetworkCounters) -> NetworkDelta {
    current
        .iter()
        .filter_map(|(name, now)| previous.get(name).map(|before| (before, now)))
        .fold(NetworkDelta::default(), |acc, (before, now)| NetworkDelta {
            sent: acc.sent + now.tx_bytes.saturating_sub(before.tx_bytes),
            received: acc.received + now.rx_bytes.saturating_sub(before.rx_bytes),
        })
}

/// Percentage of the root filesystem in use
pub fn disk_usage_percent(disk: &DiskBlocks) -> f64 {
    if disk.total_blocks == 0 {
        return 0.0;
    }
    let total = disk.block_size as f64 * disk.total_blocks as f64;
    let used = disk.block_size as f64 * disk.total_blocks.saturating_sub(disk.free_blocks) as f64;
    used / total * 100.0
}
