//! Error types shared by every perfnum role.

use thiserror::Error;

pub type PerfResult<T> = Result<T, PerfError>;

#[derive(Debug, Error)]
pub enum PerfError {
    #[error("configuration error: {0}")]
    Config(#[from] perfnum_config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),

    #[error("shared-memory region failure: {reason}")]
    ShmFailure { reason: String },

    #[error("could not bind {addr}: {reason}")]
    BindError { addr: String, reason: String },

    #[error("could not spawn worker: {reason}")]
    SpawnError { reason: String },

    #[error("signal handling failure: {reason}")]
    SignalError { reason: String },

    #[error("candidate {n} exceeded the configured divisor-buffer ceiling")]
    DivisorOverflow { n: i64 },

    #[error("invalid limit: {limit}")]
    InvalidLimit { limit: i64 },

    #[error("{what} is full")]
    ResourceFull { what: String },

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl PerfError {
    /// A short stable code, useful for log correlation across processes.
    pub fn code(&self) -> &'static str {
        match self {
            PerfError::Config(_) => "CFG",
            PerfError::Io(_) => "IO",
            PerfError::Nix(_) => "SYS",
            PerfError::ShmFailure { .. } => "SHM",
            PerfError::BindError { .. } => "BIND",
            PerfError::SpawnError { .. } => "SPAWN",
            PerfError::SignalError { .. } => "SIG",
            PerfError::DivisorOverflow { .. } => "DIVOVF",
            PerfError::InvalidLimit { .. } => "LIMIT",
            PerfError::ResourceFull { .. } => "FULL",
            PerfError::Protocol(_) => "PROTO",
        }
    }
}
