//! Error types for vouchflow

use std::time::Duration;

use thiserror::Error;

use crate::types::SecretKind;

/// Result type alias using the vouchflow Error
pub type Result<T> = std::result::Result<T, Error>;

/// vouchflow error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("Env file error: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing required variable: {0}")]
    MissingVariable(String),

    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),
}

/// Terminal failures of a single OTP rendezvous.
///
/// `Timeout` means the secret never showed up in time; `Exhausted` means the
/// state store itself kept failing. Callers treat the second as an
/// infrastructure fault rather than a missing OTP.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendezvousError {
    #[error("Timeout waiting for {kind} after {}s", .waited.as_secs())]
    Timeout { kind: SecretKind, waited: Duration },

    #[error("Failed to retrieve {kind}: state store unreachable after {attempts} consecutive attempts")]
    Exhausted { kind: SecretKind, attempts: u32 },

    #[error("Wait for {kind} was cancelled")]
    Cancelled { kind: SecretKind },
}

impl RendezvousError {
    pub fn kind(&self) -> SecretKind {
        match self {
            RendezvousError::Timeout { kind, .. }
            | RendezvousError::Exhausted { kind, .. }
            | RendezvousError::Cancelled { kind } => *kind,
        }
    }

    /// True when the channel itself is unreliable, as opposed to the secret
    /// simply not arriving.
    pub fn is_channel_fault(&self) -> bool {
        matches!(self, RendezvousError::Exhausted { .. })
    }
}
