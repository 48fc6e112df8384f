// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Authentication — single admin password stored as a salted SHA-512 hash
//!
//! The credential file holds `{hash, salt}` as JSON. A sibling file holds the
//! SHA-512 of the credential file's exact bytes and is checked at startup, so
//! a hand-edited credential file stops the server from starting.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::{error, info};

pub const CREDENTIAL_FILE: &str = "security.ini";
pub const INTEGRITY_FILE: &str = "security.ini.hash";

/// Consecutive failures before login and shutdown are locked out
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

const SALT_BYTES: usize = 16;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credential file I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credential file {0} does not match its stored hash")]
    IntegrityMismatch(PathBuf),

    #[error("password has already been set")]
    AlreadyConfigured,

    #[error("password must not be empty")]
    EmptyPassword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    hash: String,
    salt: String,
}

/// Hex SHA-512 of `data`
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

fn password_hash(password: &str, salt: &str) -> String {
    sha512_hex(format!("{}{}", password, salt).as_bytes())
}

fn generate_salt() -> String {
    let bytes: [u8; SALT_BYTES] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

/// Constant-time string comparison
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.as_bytes().iter().zip(b.as_bytes().iter())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// On-disk password store with an in-memory copy of the current credentials
pub struct CredentialStore {
    credential_path: PathBuf,
    integrity_path: PathBuf,
    current: RwLock<Option<StoredCredentials>>,
}

impl CredentialStore {
    /// Open the store in `dir`, verifying the integrity hash if a password
    /// has already been set. Any error here must stop the process.
    pub fn open(dir: &Path) -> Result<Self, AuthError> {
        let credential_path = dir.join(CREDENTIAL_FILE);
        let integrity_path = dir.join(INTEGRITY_FILE);

        let current = if credential_path.exists() {
            let content = read_file(&credential_path)?;
            let stored = read_file(&integrity_path)?;
            let stored = String::from_utf8_lossy(&stored);
            if stored.trim() != sha512_hex(&content) {
                error!("Security file {} has been tampered with", credential_path.display());
                return Err(AuthError::IntegrityMismatch(credential_path));
            }
            Some(serde_json::from_slice::<StoredCredentials>(&content)?)
        } else {
            info!("No password set yet, initial setup required");
            None
        };

        Ok(Self {
            credential_path,
            integrity_path,
            current: RwLock::new(current),
        })
    }

    /// True once a password has been set
    pub fn is_configured(&self) -> bool {
        self.current.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Set the initial password. Only the first call can succeed.
    pub fn set_password(&self, password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        if current.is_some() {
            return Err(AuthError::AlreadyConfigured);
        }

        let salt = generate_salt();
        let credentials = StoredCredentials {
            hash: password_hash(password, &salt),
            salt,
        };
        let content = serde_json::to_vec(&credentials)?;
        write_file(&self.credential_path, &content)?;
        write_file(&self.integrity_path, sha512_hex(&content).as_bytes())?;

        *current = Some(credentials);
        info!("Initial password stored in {}", self.credential_path.display());
        Ok(())
    }

    /// Check a password. Always false before setup.
    pub fn validate(&self, password: &str) -> bool {
        let current = self.current.read().unwrap_or_else(|p| p.into_inner());
        match current.as_ref() {
            Some(creds) => constant_time_eq(&password_hash(password, &creds.salt), &creds.hash),
            None => false,
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, AuthError> {
    std::fs::read(path).map_err(|source| AuthError::Io { path: path.to_path_buf(), source })
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), AuthError> {
    std::fs::write(path, content).map_err(|source| AuthError::Io { path: path.to_path_buf(), source })
}

/// Counts consecutive failed password attempts across login and shutdown.
///
/// There is no time-based decay: only a successful login clears it.
///
/// Every attempt reserves a failure slot up front with [`begin_attempt`],
/// so concurrent wrong guesses can never get past the cap. A correct
/// password hands its slot back with [`cancel_attempt`].
///
/// [`begin_attempt`]: LoginThrottle::begin_attempt
/// [`cancel_attempt`]: LoginThrottle::cancel_attempt
pub struct LoginThrottle {
    failures: AtomicU32,
}

impl LoginThrottle {
    pub fn new() -> Self {
        Self { failures: AtomicU32::new(0) }
    }

    /// Reserve a slot for one password check. Returns the failure count this
    /// attempt would make if the password is wrong, or `None` when locked.
    pub fn begin_attempt(&self) -> Option<u32> {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < MAX_FAILED_ATTEMPTS).then_some(n + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Give back the slot taken by [`begin_attempt`](Self::begin_attempt)
    pub fn cancel_attempt(&self) {
        let _ = self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}
