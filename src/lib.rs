//! TAK interop - native peer lifecycle bridge
//!
//! Wraps native engine handles in proxy objects and guarantees each owned
//! native resource is released exactly once, whether the proxy is disposed
//! explicitly or simply dropped.
//!
//! - `interop` - per-type bindings (wrap/unwrap/destruct)
//! - `peer` - registrations, cleaners and the reclamation path
//! - `spi` - factory registries keyed by type or native type name
//! - `context` - per-thread current native context

pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod interop;
pub mod logging;
pub mod peer;
pub mod spi;

pub use config::InteropConfig;
pub use context::{ContextRef, ContextScope, ExecutionScope, NativeContext};
pub use error::{InteropError, Result};
pub use handle::Handle;
pub use interop::{Bindings, Interop, InteropCleaner};
pub use peer::{Cleaner, Opaque, Owner, Peer, PeerAccess, PeerManager, PeerStats, Reclaimer};
pub use spi::{Factory, FactoryRegistry};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::logging::info;

/// Reclamation thread for the global peer manager
static RECLAIMER: Lazy<Mutex<Option<Reclaimer>>> = Lazy::new(|| Mutex::new(None));

/// Bring up logging and the global reclamation thread. Safe to call again.
pub fn init(config: &InteropConfig) -> Result<()> {
    logging::init_with_config(config.log.clone());

    if config.reclaim.background {
        let mut slot = RECLAIMER.lock();
        if slot.is_none() {
            let reclaimer = PeerManager::global()
                .spawn_reclaimer(&config.reclaim)
                .map_err(|e| InteropError::Reclaimer(e.to_string()))?;
            *slot = Some(reclaimer);
        }
    }

    let _ = Bindings::global();
    info!(
        target: "tak_interop",
        event = "init",
        background_reclaim = config.reclaim.background,
        "Interop bridge initialized"
    );
    Ok(())
}

/// Stop the reclamation thread and release everything already unreachable.
///
/// Returns how many registrations the reclamation path released, including
/// the background thread's lifetime total.
pub fn cleanup() -> Result<usize> {
    let reclaimer = RECLAIMER.lock().take();
    let mut released = reclaimer.map_or(0, Reclaimer::shutdown);
    released += PeerManager::global().reclaim_pending()?;

    let stats = PeerManager::global().stats();
    info!(
        target: "tak_interop",
        event = "cleanup",
        released,
        live = stats.live,
        "Interop bridge shut down"
    );
    Ok(released)
}
