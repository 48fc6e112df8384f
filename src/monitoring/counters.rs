// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Counter snapshots — absolute readings of the host's cumulative counters
//!
//! Reads per-core CPU ticks from /proc/stat, per-interface byte counters via
//! sysinfo and root filesystem block counts via statvfs(). All host reads run
//! on tokio's blocking pool.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sysinfo::{Networks, System};
use thiserror::Error;
use tokio::time::Instant;

const PROC_STAT: &str = "/proc/stat";
const ROOT_FS: &str = "/";

/// Errors raised while reading host counters
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: &'static str, reason: String },

    #[error("statvfs({path}) failed: {source}")]
    Statvfs {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("counter read worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Cumulative tick counters for one core since boot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreTicks {
    pub idle: u64,
    pub user: u64,
    pub sys: u64,
    pub total: u64,
}

/// Cumulative byte counters for one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceBytes {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

pub type NetworkCounters = BTreeMap<String, InterfaceBytes>;

/// Block counts of the root filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskBlocks {
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
}

/// One point-in-time reading of every counter the sampler consumes.
///
/// Snapshots carry a monotonic timestamp, so two of them are only ever
/// compared within the lifetime of the process that took them.
#[derive(Debug, Clone)]
pub struct CounterSnapshot {
    pub taken_at: Instant,
    pub cores: Vec<CoreTicks>,
    pub network: NetworkCounters,
    pub disk: DiskBlocks,
}

impl CounterSnapshot {
    pub fn new(cores: Vec<CoreTicks>, network: NetworkCounters, disk: DiskBlocks) -> Self {
        Self {
            taken_at: Instant::now(),
            cores,
            network,
            disk,
        }
    }
}

/// Where the sampler gets its readings from.
///
/// Both reads must yield while the host is being read, otherwise the
/// scheduler's deadline can't interrupt a stalled read.
#[allow(async_fn_in_trait)]
pub trait CounterSource {
    async fn snapshot(&mut self) -> Result<CounterSnapshot, SampleError>;

    /// Host memory in use, as a percentage of physical memory
    async fn memory_percent(&mut self) -> Result<f64, SampleError>;
}

/// Run a blocking host read on tokio's blocking pool.
///
/// If the caller stops waiting, the read still runs to completion on its
/// worker thread and the result is discarded.
pub async fn read_off_thread<T, F>(read: F) -> Result<T, SampleError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SampleError> + Send + 'static,
{
    tokio::task::spawn_blocking(read).await?
}

struct HostHandles {
    sys: System,
    networks: Networks,
}

/// Reads counters straight from the running Linux host
pub struct ProcCounterSource {
    handles: Arc<Mutex<HostHandles>>,
}

impl ProcCounterSource {
    pub fn new() -> Self {
        Self {
            handles: Arc::new(Mutex::new(HostHandles {
                sys: System::new(),
                networks: Networks::new(),
            })),
        }
    }
}

impl CounterSource for ProcCounterSource {
    async fn snapshot(&mut self) -> Result<CounterSnapshot, SampleError> {
        let handles = Arc::clone(&self.handles);
        read_off_thread(move || {
            let stat = read_proc(PROC_STAT)?;
            let cores = parse_proc_stat(&stat)?;
            let network = {
                let mut handles = handles.lock().unwrap_or_else(|p| p.into_inner());
                // Picks up interfaces that appeared since the last read
                handles.networks.refresh_list();
                network_counters(&handles.networks)
            };
            let disk = read_disk_blocks(ROOT_FS)?;
            Ok(CounterSnapshot::new(cores, network, disk))
        })
        .await
    }

    async fn memory_percent(&mut self) -> Result<f64, SampleError> {
        let handles = Arc::clone(&self.handles);
        read_off_thread(move || {
            let mut handles = handles.lock().unwrap_or_else(|p| p.into_inner());
            handles.sys.refresh_memory();
            let total = handles.sys.total_memory();
            if total == 0 {
                return Ok(0.0);
            }
            Ok(handles.sys.used_memory() as f64 / total as f64 * 100.0)
        })
        .await
    }
}

/// Per-interface byte totals, loopback excluded
fn network_counters(networks: &Networks) -> NetworkCounters {
    networks.iter()
        .filter(|(name, _)| *name != "lo")
        .map(|(name, data)| (name.clone(), InterfaceBytes {
            tx_bytes: data.total_transmitted(),
            rx_bytes: data.total_received(),
        }))
        .collect()
}

fn read_proc(path: &'static str) -> Result<String, SampleError> {
    std::fs::read_to_string(path).map_err(|source| SampleError::Read { path, source })
}

/// Parse the per-core `cpuN` lines of /proc/stat.
///
/// Field order: `cpuN user nice system idle iowait irq softirq steal ...`
pub fn parse_proc_stat(content: &str) -> Result<Vec<CoreTicks>, SampleError> {
    let mut cores: Vec<(u32, CoreTicks)> = Vec::new();

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else { continue };
        let Some(index) = label.strip_prefix("cpu") else { continue };
        // The aggregate "cpu" line has no index
        let Ok(index) = index.parse::<u32>() else { continue };

        let values: Vec<u64> = fields
            .take(8)
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|e| SampleError::Parse {
                path: PROC_STAT,
                reason: format!("{}: {}", label, e),
            })?;
        if values.len() < 4 {
            return Err(SampleError::Parse {
                path: PROC_STAT,
                reason: format!("{} has {} fields, expected at least 4", label, values.len()),
            });
        }

        let field = |i: usize| values.get(i).copied().unwrap_or(0);
        let (user, nice, system, idle) = (field(0), field(1), field(2), field(3));
        let (iowait, irq, softirq, steal) = (field(4), field(5), field(6), field(7));

        cores.push((index, CoreTicks {
            idle: idle + iowait,
            user: user + nice,
            sys: system + irq + softirq,
            total: user + nice + system + idle + iowait + irq + softirq + steal,
        }));
    }

    cores.sort_by_key(|(index, _)| *index);
    Ok(cores.into_iter().map(|(_, ticks)| ticks).collect())
}

fn read_disk_blocks(path: &'static str) -> Result<DiskBlocks, SampleError> {
    let c_path = std::ffi::CString::new(path)
        .map_err(|e| SampleError::Statvfs {
            path,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;

    // SAFETY: statvfs is a plain C struct of integers, so all-zero is a valid value
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and outlives the call; stat is a valid,
    // exclusively borrowed out-pointer
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return Err(SampleError::Statvfs {
            path,
            source: std::io::Error::last_os_error(),
        });
    }

    Ok(DiskBlocks {
        block_size: stat.f_frsize as u64,
        total_blocks: stat.f_blocks as u64,
        free_blocks: stat.f_bfree as u64,
    })
}
