// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Access log — append-only record of security events

use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

pub const ACCESS_LOG_FILE: &str = "access.log";

pub struct AccessLog {
    path: PathBuf,
    // Serializes appends so concurrent events never interleave
    lock: Mutex<()>,
}

impl AccessLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(ACCESS_LOG_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Append `[timestamp] message`. A failed write is logged, never returned.
    pub fn record(&self, message: &str) {
        info!("{}", message);
        let line = format!("[{}] {}\n", Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true), message);

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!("Cannot write access log {}: {}", self.path.display(), e);
        }
    }
}
