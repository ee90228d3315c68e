//! CLI Commands

pub mod claim;
pub mod run;
pub mod store;
pub mod trigger;
pub mod validate;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Token cancelled on the first Ctrl-C
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling...");
            child.cancel();
        }
    });
    token
}
