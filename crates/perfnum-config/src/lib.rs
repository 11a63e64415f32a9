//! Centralized configuration for the perfnum workspace.
//!
//! Single source of truth for every well-known name and tunable this
//! system needs as a constant (shm name, FIFO path, PID-file path, TCP
//! port, `NPERFNUMS`, `NPROCS`, `NASSIGN`, the worker's divisor-buffer
//! ceiling). `Settings::default()` reproduces the hardcoded values this
//! system has always shipped with; `Settings::from_env()` layers
//! environment-variable overrides on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Shared-memory object name.
pub const SHM_NAME: &str = "albertd";
/// FIFO path for the PIPES method, relative to the working directory.
pub const FIFO_PATH: &str = ".perfect_numbers";
/// PID-file path for the PIPES method, relative to the working directory.
pub const PID_FILE_PATH: &str = "manage.pid";
/// TCP port for the SOCKET method.
pub const TCP_PORT: u16 = 10054;
/// Capacity of the result table.
pub const NPERFNUMS: usize = 20;
/// Capacity of the worker roster.
pub const NPROCS: usize = 20;
/// Candidates handed out per SOCKET `RANGE` grant.
pub const NASSIGN: i64 = 1000;
/// Design ceiling on the number of divisors a single candidate can have,
/// for the limits this system supports. Exceeding it is a
/// configuration error in `L`, not a correctness bug in the predicate.
pub const MAX_DIVISORS: usize = 10_000;
/// Listen backlog for the SOCKET coordinator.
pub const LISTEN_BACKLOG: i32 = 32;
/// Capacity of the SOCKET coordinator's `allfds` client table; a full
/// table refuses new connections immediately. Sized generously above
/// `LISTEN_BACKLOG` so a burst of workers plus one reporter is never
/// rejected under normal use.
pub const MAX_SOCKET_CLIENTS: usize = 64;

/// Centralized settings — every name and tunable the three roles share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub shm_name: String,
    pub fifo_path: PathBuf,
    pub pid_file_path: PathBuf,
    pub tcp_port: u16,
    pub nperfnums: usize,
    pub nprocs: usize,
    pub nassign: i64,
    pub max_divisors: usize,
    pub listen_backlog: i32,
    pub max_socket_clients: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shm_name: SHM_NAME.to_string(),
            fifo_path: PathBuf::from(FIFO_PATH),
            pid_file_path: PathBuf::from(PID_FILE_PATH),
            tcp_port: TCP_PORT,
            nperfnums: NPERFNUMS,
            nprocs: NPROCS,
            nassign: NASSIGN,
            max_divisors: MAX_DIVISORS,
            listen_backlog: LISTEN_BACKLOG,
            max_socket_clients: MAX_SOCKET_CLIENTS,
        }
    }
}

impl Settings {
    /// Load defaults, then apply any `PERFNUM_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("PERFNUM_SHM_NAME") {
            settings.shm_name = v;
        }
        if let Ok(v) = std::env::var("PERFNUM_FIFO_PATH") {
            settings.fifo_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PERFNUM_PID_FILE") {
            settings.pid_file_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PERFNUM_TCP_PORT") {
            settings.tcp_port = v
                .parse()
                .map_err(|_| ConfigError::Invalid("PERFNUM_TCP_PORT must be a u16".into()))?;
        }
        if let Ok(v) = std::env::var("PERFNUM_NASSIGN") {
            settings.nassign = v
                .parse()
                .map_err(|_| ConfigError::Invalid("PERFNUM_NASSIGN must be a positive integer".into()))?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load from a TOML file, falling back to defaults for absent fields.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let settings: Settings = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nperfnums == 0 {
            return Err(ConfigError::Invalid("nperfnums must be > 0".into()));
        }
        if self.nprocs == 0 {
            return Err(ConfigError::Invalid("nprocs must be > 0".into()));
        }
        if self.nassign <= 0 {
            return Err(ConfigError::Invalid("nassign must be > 0".into()));
        }
        if self.max_divisors == 0 {
            return Err(ConfigError::Invalid("max_divisors must be > 0".into()));
        }
        if self.max_socket_clients == 0 {
            return Err(ConfigError::Invalid("max_socket_clients must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
