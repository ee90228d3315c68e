//! vouchflow common library
//!
//! Shared types, configuration, the state store client and the OTP
//! rendezvous poller used by the checkout runner, the trigger server and the CLI.

pub mod clock;
pub mod config;
pub mod envcheck;
pub mod error;
pub mod rendezvous;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{AppConfig, Credentials};
pub use error::{Error, RendezvousError, Result};
pub use rendezvous::{PollerConfig, Rendezvous, SecretSource};
pub use store::{HttpStateStore, StateStore};
pub use types::*;

/// vouchflow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default location of the configuration file
pub fn default_config_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".vouchflow")
        .join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
