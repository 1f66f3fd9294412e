//! Per-registration state machine
//!
//! Armed -> Running -> Released   (reclamation)
//! Armed -> Disarmed -> Released  (explicit dispose)
//! Armed -> Released              (abandoned before the proxy was handed out)
//!
//! Every edge is a single compare-exchange on the registration's own state
//! word, so two racing release paths never both win.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::cleaner::{Cleaner, Opaque};
use super::Owner;
use crate::error::{InteropError, Result};
use crate::handle::Handle;

/// Identifier of one registration (never reused within a manager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub(crate) u64);

impl RegistrationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Armed = 0,
    Running = 1,
    Disarmed = 2,
    Released = 3,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Armed,
            1 => Self::Running,
            2 => Self::Disarmed,
            _ => Self::Released,
        }
    }
}

pub(crate) struct Registration {
    pub(crate) id: RegistrationId,
    pub(crate) handle: Handle,
    cleaner: Arc<dyn Cleaner>,
    opaque: Mutex<Option<Opaque>>,
    owner: Mutex<Option<Owner>>,
    state: AtomicU8,
    /// Read side held by proxies during native calls, write side by the cleaner
    pub(crate) access: RwLock<()>,
}

impl Registration {
    pub(crate) fn new(
        id: RegistrationId,
        handle: Handle,
        cleaner: Arc<dyn Cleaner>,
        opaque: Option<Opaque>,
        owner: Option<Owner>,
    ) -> Self {
        Self {
            id,
            handle,
            cleaner,
            opaque: Mutex::new(opaque),
            owner: Mutex::new(owner),
            state: AtomicU8::new(State::Armed as u8),
            access: RwLock::new(()),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_armed(&self) -> bool {
        self.state() == State::Armed
    }

    #[inline]
    fn transition(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Armed -> Running; false if dispose (or another reclaim) got there first
    pub(crate) fn begin_run(&self) -> bool {
        self.transition(State::Armed, State::Running)
    }

    /// Armed -> Disarmed; false if already disarmed, running or released
    pub(crate) fn disarm(&self) -> bool {
        self.transition(State::Armed, State::Disarmed)
    }

    /// Armed -> Released without running the cleaner
    pub(crate) fn abandon(&self) -> bool {
        let won = self.transition(State::Armed, State::Released);
        if won {
            self.owner.lock().take();
            self.opaque.lock().take();
        }
        won
    }

    /// Run the cleaner body. Caller must have won `begin_run` or `disarm`.
    ///
    /// Returns whether an opaque payload was handed to the cleaner.
    pub(crate) fn run_cleaner(&self) -> bool {
        debug_assert!(matches!(self.state(), State::Running | State::Disarmed));

        // Waits for proxies that are mid-call on this handle
        let _exclusive = self.access.write();

        let opaque = self.opaque.lock().take();
        let had_opaque = opaque.is_some();

        let handle = self.handle;
        let cleaner = &self.cleaner;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cleaner.run(handle, opaque)
        }));
        if outcome.is_err() {
            crate::logging::error!(
                target: "tak_interop::peer",
                event = "cleaner_panic",
                registration = self.id.0,
                address = handle.address(),
                "Cleaner panicked; handle considered released"
            );
        }

        self.owner.lock().take();
        had_opaque
    }

    /// Running|Disarmed -> Released
    pub(crate) fn finish(&self, from: State) -> Result<()> {
        if self.transition(from, State::Released) {
            Ok(())
        } else {
            Err(InteropError::DoubleRelease {
                address: self.handle.address(),
            })
        }
    }

    pub(crate) fn owner(&self) -> Option<Owner> {
        self.owner.lock().clone()
    }
}
