//! vouchflow trigger server
//!
//! Exposes `POST /start` to kick off a checkout run, plus `/health` and
//! `/status` for monitoring. Only one run is admitted at a time.

pub mod admission;
pub mod runner;
pub mod server;

pub use admission::{RunGuard, RunPermit};
pub use runner::{AutomationRunner, CheckoutRunner};
pub use server::TriggerServer;
