//! C FFI - entry points the native engine calls into
//!
//! Design: stable C ABI, errors reported as negative return codes.
//! 1. Bridge lifecycle (init, cleanup)
//! 2. Current-context lookup for callbacks running on a bridged thread
//! 3. Synchronous reclamation for hosts without a background thread

use crate::config::InteropConfig;
use crate::context;
use crate::logging::{debug, log_ffi_error};
use crate::peer::PeerManager;

/// Status codes returned across the boundary
pub const TAK_INTEROP_OK: i32 = 0;
pub const TAK_INTEROP_ERR_CONFIG: i32 = -1;
pub const TAK_INTEROP_ERR_RECLAIM: i32 = -2;
pub const TAK_INTEROP_ERR_INVARIANT: i32 = -3;

fn status(err: &crate::InteropError) -> i32 {
    if err.is_invariant_violation() {
        TAK_INTEROP_ERR_INVARIANT
    } else if matches!(err, crate::InteropError::Reclaimer(_)) {
        TAK_INTEROP_ERR_RECLAIM
    } else {
        TAK_INTEROP_ERR_CONFIG
    }
}

/// Initialize the bridge from `TAK_INTEROP_*` environment variables
#[no_mangle]
pub extern "C" fn tak_interop_init() -> i32 {
    let result = InteropConfig::from_env().and_then(|config| crate::init(&config));
    match result {
        Ok(()) => TAK_INTEROP_OK,
        Err(err) => {
            log_ffi_error("tak_interop_init", &err.to_string());
            status(&err)
        }
    }
}

/// Shut the bridge down; returns the number of releases or a negative status
#[no_mangle]
pub extern "C" fn tak_interop_cleanup() -> i64 {
    match crate::cleanup() {
        Ok(released) => released as i64,
        Err(err) => {
            log_ffi_error("tak_interop_cleanup", &err.to_string());
            status(&err) as i64
        }
    }
}

/// Address of the context current on the calling thread, 0 if none
#[no_mangle]
pub extern "C" fn tak_interop_current_context() -> usize {
    context::current_handle().address()
}

/// Drain the global reclamation queue on the calling thread
#[no_mangle]
pub extern "C" fn tak_interop_reclaim_pending() -> i64 {
    match PeerManager::global().reclaim_pending() {
        Ok(released) => {
            debug!(target: "tak_interop::ffi", released, "Reclaimed from native call");
            released as i64
        }
        Err(err) => {
            log_ffi_error("tak_interop_reclaim_pending", &err.to_string());
            status(&err) as i64
        }
    }
}
