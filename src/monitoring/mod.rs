// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! System monitoring — host facts plus an adaptive CPU/disk/network sample,
//! merged into the snapshot served at /sysinfo

pub mod counters;
pub mod delta;
pub mod history;
pub mod sampler;

use serde::Serialize;
use sysinfo::System;
use tracing::{info, warn};

use counters::{CounterSource, SampleError};
use sampler::Report;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Facts about the host that don't need sampling
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub cpu_model: String,
    pub hostname: String,
    pub uptime_secs: u64,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
}

/// The record returned by /sysinfo
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub cpu_model: String,
    pub hostname: String,
    pub uptime: String,
    pub cpu_usage: String,
    pub total_mem: String,
    pub used_mem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_load: Option<Report>,
}

impl SystemSnapshot {
    /// Merge a sample run with the host facts. A failed run only costs the
    /// CPU figures; everything else is still reported.
    pub fn assemble(facts: HostFacts, load: Result<Report, SampleError>) -> Self {
        let load = match load {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Error retrieving CPU load: {}", e);
                None
            }
        };
        let cpu_usage = match &load {
            Some(report) => format!("{:.2} %", report.highest_load),
            None => "N/A".to_string(),
        };

        Self {
            cpu_model: facts.cpu_model,
            hostname: facts.hostname,
            uptime: format_uptime(facts.uptime_secs),
            cpu_usage,
            total_mem: format!("{:.2} GiB", facts.memory_total_bytes as f64 / GIB),
            used_mem: format!("{:.2} GiB", facts.memory_used_bytes as f64 / GIB),
            cpu_load: load,
        }
    }
}

/// "3d 4h 5m", or "4h 5m" under a day
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

/// System monitor that keeps its sysinfo handle between requests
pub struct SystemMonitor {
    sys: System,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        Self { sys }
    }

    /// Current static host facts
    pub fn host_facts(&mut self) -> HostFacts {
        self.sys.refresh_memory();

        let cpu_model = self.sys.cpus().first()
            .map(|c| c.brand().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        HostFacts {
            cpu_model,
            hostname,
            uptime_secs: System::uptime(),
            memory_total_bytes: self.sys.total_memory(),
            memory_used_bytes: self.sys.used_memory(),
        }
    }
}

/// Sample the host and assemble the full snapshot
pub async fn collect_snapshot<S: CounterSource>(facts: HostFacts, source: &mut S) -> SystemSnapshot {
    let load = sampler::sample(source).await;
    let snapshot = SystemSnapshot::assemble(facts, load);
    info!(
        "System Info: CPU Model: {} | Hostname: {} | Uptime: {} | CPU Usage: {} | Total Memory: {} | Used Memory: {}",
        snapshot.cpu_model, snapshot.hostname, snapshot.uptime,
        snapshot.cpu_usage, snapshot.total_mem, snapshot.used_mem
    );
    snapshot
}
