//! Peer manager - exactly-once release of native resources
//!
//! Design: every owned handle that gets wrapped receives one registration,
//! which holds the cleaner and a per-registration state word.
//! 1. `register` arms the registration and hands back a `Peer` token
//! 2. Dropping the last clone of the token queues the registration for reclamation
//! 3. `dispose` (or `disarm`) releases in-line and turns the queued reclaim into a no-op
//!
//! Layout:
//! - `registration.rs` - state machine (Armed/Running/Disarmed/Released)
//! - `cleaner.rs` - cleaner protocol
//! - `reclaim.rs` - background reclamation thread

mod cleaner;
mod reclaim;
mod registration;

#[cfg(test)]
mod tests;

pub use cleaner::{Cleaner, NoopCleaner, Opaque};
pub use reclaim::Reclaimer;
pub use registration::{RegistrationId, State};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use flume::{Receiver, Sender, TryRecvError};
use once_cell::sync::Lazy;
use parking_lot::RwLockReadGuard;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{InteropError, Result};
use crate::handle::Handle;
use crate::logging::{
    debug, log_cleaner_warning, log_invariant_violation, log_register, log_release,
    log_unretained_warning,
};
use registration::Registration;

/// Object that keeps a native resource's parent alive (e.g. the renderer that
/// produced a control); retained until the registration is released
pub type Owner = Arc<dyn Any + Send + Sync>;

static GLOBAL: Lazy<PeerManager> = Lazy::new(|| {
    let capacity = crate::config::InteropConfig::from_env()
        .map(|config| config.peers.initial_capacity)
        .unwrap_or(DEFAULT_CAPACITY);
    PeerManager::with_capacity(capacity)
});

const DEFAULT_CAPACITY: usize = 256;

pub(crate) enum ReclaimMsg {
    Unreachable(RegistrationId),
    Shutdown,
}

pub(crate) struct PeerTable {
    registrations: DashMap<RegistrationId, Arc<Registration>>,
    /// address -> armed registration responsible for releasing it
    live_handles: DashMap<usize, RegistrationId>,
    /// Addresses released through this manager and not registered since
    released: DashSet<usize>,
    next_id: AtomicU64,
    reclaim_tx: Sender<ReclaimMsg>,
    reclaim_rx: Receiver<ReclaimMsg>,
    /// At most one reclamation thread per manager
    reclaimer_active: AtomicBool,
    stats: Counters,
}

#[derive(Default)]
struct Counters {
    registered: AtomicUsize,
    released_by_dispose: AtomicUsize,
    released_by_reclaim: AtomicUsize,
    abandoned: AtomicUsize,
    opaque_warnings: AtomicUsize,
    unretained_warnings: AtomicUsize,
}

/// Process-wide (or test-local) owner of all handle registrations
#[derive(Clone)]
pub struct PeerManager {
    table: Arc<PeerTable>,
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (reclaim_tx, reclaim_rx) = flume::unbounded();
        Self {
            table: Arc::new(PeerTable {
                registrations: DashMap::with_capacity(capacity),
                live_handles: DashMap::with_capacity(capacity),
                released: DashSet::new(),
                next_id: AtomicU64::new(1),
                reclaim_tx,
                reclaim_rx,
                reclaimer_active: AtomicBool::new(false),
                stats: Counters::default(),
            }),
        }
    }

    /// The process-wide manager used by `Bindings::global()`
    pub fn global() -> &'static PeerManager {
        &GLOBAL
    }

    /// Arm a registration for `handle`.
    ///
    /// Borrowed and null handles are not registered; the returned peer is
    /// unmanaged and its dispose/drop do nothing.
    pub fn register(
        &self,
        handle: Handle,
        cleaner: Arc<dyn Cleaner>,
        opaque: Option<Opaque>,
        owner: Option<Owner>,
    ) -> Result<Peer> {
        if !handle.owns() || handle.is_null() {
            debug!(address = handle.address(), "Skipping registration for non-owning handle");
            return Ok(Peer::unmanaged_with_owner(handle, owner));
        }

        let id = RegistrationId(self.table.next_id.fetch_add(1, Ordering::Relaxed));

        match self.table.live_handles.entry(handle.address()) {
            Entry::Occupied(_) => {
                log_invariant_violation("double registration", handle);
                return Err(InteropError::DoubleRegistration {
                    address: handle.address(),
                });
            }
            Entry::Vacant(slot) => {
                let registration = Arc::new(Registration::new(id, handle, cleaner, opaque, owner));
                // Insert while the address shard is still locked so lookups by
                // address never observe an id without its registration
                self.table.registrations.insert(id, registration.clone());
                slot.insert(id);
                // The native side handed the address out again
                self.table.released.remove(&handle.address());

                self.table.stats.registered.fetch_add(1, Ordering::Relaxed);
                log_register(id.0, handle);

                Ok(Peer {
                    handle,
                    link: Some(Arc::new(PeerLink {
                        registration,
                        table: self.table.clone(),
                    })),
                    owner: None,
                })
            }
        }
    }

    /// Explicit dispose: Armed -> Disarmed, then release in-line.
    ///
    /// Idempotent; unknown or already released ids are a no-op.
    pub fn disarm(&self, id: RegistrationId) -> Result<()> {
        match self.table.registration(id) {
            Some(registration) => self.table.dispose(&registration),
            None => Ok(()),
        }
    }

    /// Report that the proxy holding `id` became unreachable. The release
    /// happens when the queue is drained.
    pub fn notify_unreachable(&self, id: RegistrationId) {
        self.table.enqueue(id);
    }

    /// Drain the reclamation queue on the calling thread
    pub fn reclaim_pending(&self) -> Result<usize> {
        let mut released = 0;
        loop {
            match self.table.reclaim_rx.try_recv() {
                Ok(ReclaimMsg::Unreachable(id)) => {
                    if self.table.reclaim(id)? {
                        released += 1;
                    }
                }
                // Shutdown is only meaningful to a reclaimer thread
                Ok(ReclaimMsg::Shutdown) => {
                    let _ = self.table.reclaim_tx.send(ReclaimMsg::Shutdown);
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(released)
    }

    /// Start a thread that drains the reclamation queue as events arrive
    pub fn spawn_reclaimer(&self, config: &crate::config::ReclaimConfig) -> std::io::Result<Reclaimer> {
        Reclaimer::spawn(self.table.clone(), config)
    }

    /// Whether an armed registration currently covers `handle`
    pub fn is_registered(&self, handle: Handle) -> bool {
        self.table.live_handles.contains_key(&handle.address())
    }

    pub fn state(&self, id: RegistrationId) -> Option<State> {
        self.table.registration(id).map(|r| r.state())
    }

    /// Whether `handle` was released through this manager and has not been
    /// registered again since
    pub fn is_released(&self, handle: Handle) -> bool {
        self.table.released.contains(&handle.address())
    }

    /// Number of registrations not yet released (cleaners in flight included)
    pub fn live_count(&self) -> usize {
        self.table.registrations.len()
    }

    /// Record a direct destruct of an unregistered handle.
    ///
    /// Returns false when the address was already released.
    pub(crate) fn mark_released(&self, handle: Handle) -> bool {
        self.table.released.insert(handle.address())
    }

    /// A wrap produced a proxy that kept no clone of its peer
    pub(crate) fn note_unretained(&self, handle: Handle) {
        self.table.stats.unretained_warnings.fetch_add(1, Ordering::Relaxed);
        log_unretained_warning(handle);
    }

    pub fn stats(&self) -> PeerStats {
        let stats = &self.table.stats;
        PeerStats {
            live: self.live_count(),
            registered: stats.registered.load(Ordering::Relaxed),
            released_by_dispose: stats.released_by_dispose.load(Ordering::Relaxed),
            released_by_reclaim: stats.released_by_reclaim.load(Ordering::Relaxed),
            abandoned: stats.abandoned.load(Ordering::Relaxed),
            opaque_warnings: stats.opaque_warnings.load(Ordering::Relaxed),
            unretained_warnings: stats.unretained_warnings.load(Ordering::Relaxed),
        }
    }

    /// Release without running the cleaner; used when no proxy was produced
    pub(crate) fn abandon(&self, peer: &Peer) {
        if let Some(link) = &peer.link {
            let registration = &link.registration;
            if registration.abandon() {
                self.table.remove(registration);
                self.table.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl fmt::Debug for PeerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerManager")
            .field("live", &self.live_count())
            .finish()
    }
}

impl PeerTable {
    fn registration(&self, id: RegistrationId) -> Option<Arc<Registration>> {
        self.registrations.get(&id).map(|r| r.value().clone())
    }

    fn enqueue(&self, id: RegistrationId) {
        // Receiver lives in the same table, so the channel cannot be closed here
        let _ = self.reclaim_tx.send(ReclaimMsg::Unreachable(id));
    }

    fn dispose(&self, registration: &Registration) -> Result<()> {
        if !registration.disarm() {
            return Ok(());
        }
        self.release(registration, State::Disarmed)?;
        self.stats.released_by_dispose.fetch_add(1, Ordering::Relaxed);
        log_release(registration.id.0, registration.handle, "dispose");
        Ok(())
    }

    /// Returns whether this call released the handle
    pub(crate) fn reclaim(&self, id: RegistrationId) -> Result<bool> {
        let Some(registration) = self.registration(id) else {
            return Ok(false);
        };
        if !registration.begin_run() {
            return Ok(false);
        }
        self.release(&registration, State::Running)?;
        self.stats.released_by_reclaim.fetch_add(1, Ordering::Relaxed);
        log_release(id.0, registration.handle, "reclaim");
        Ok(true)
    }

    fn release(&self, registration: &Registration, from: State) -> Result<()> {
        // Retire the address before the native free: once the cleaner returns
        // the allocator may hand it out again, and a wrap of it must succeed
        self.released.insert(registration.handle.address());
        self.unmap_address(registration);

        if registration.run_cleaner() {
            self.stats.opaque_warnings.fetch_add(1, Ordering::Relaxed);
            log_cleaner_warning(registration.id.0, registration.handle);
        }
        let finished = registration.finish(from);
        self.registrations.remove(&registration.id);
        finished.map_err(|err| {
            log_invariant_violation("double release", registration.handle);
            err
        })
    }

    /// Drop a registration that never released anything
    fn remove(&self, registration: &Registration) {
        self.unmap_address(registration);
        self.registrations.remove(&registration.id);
    }

    fn unmap_address(&self, registration: &Registration) {
        self.live_handles
            .remove_if(&registration.handle.address(), |_, id| *id == registration.id);
    }
}

/// Counters for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub live: usize,
    pub registered: usize,
    pub released_by_dispose: usize,
    pub released_by_reclaim: usize,
    pub abandoned: usize,
    pub opaque_warnings: usize,
    /// Proxies that did not keep their peer and were queued for reclamation
    /// as soon as the wrap returned
    pub unretained_warnings: usize,
}

struct PeerLink {
    registration: Arc<Registration>,
    table: Arc<PeerTable>,
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        // Last proxy clone gone
        if self.registration.is_armed() {
            self.table.enqueue(self.registration.id);
        }
    }
}

/// Token a proxy holds for its native resource.
///
/// Clones share one registration. When the last clone is dropped the
/// registration is queued for reclamation unless it was disposed first.
#[derive(Clone)]
pub struct Peer {
    handle: Handle,
    link: Option<Arc<PeerLink>>,
    /// Owner of an unmanaged peer; managed peers keep it in the registration
    owner: Option<Owner>,
}

impl Peer {
    /// Peer with no registration (borrowed views, null handles)
    pub fn unmanaged(handle: Handle) -> Self {
        Self::unmanaged_with_owner(handle, None)
    }

    fn unmanaged_with_owner(handle: Handle, owner: Option<Owner>) -> Self {
        Self {
            handle,
            link: None,
            owner,
        }
    }

    /// Raw handle; no liveness check
    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn registration_id(&self) -> Option<RegistrationId> {
        self.link.as_ref().map(|l| l.registration.id)
    }

    pub fn is_managed(&self) -> bool {
        self.link.is_some()
    }

    /// Live clones of this token, 0 for unmanaged peers
    pub(crate) fn clone_count(&self) -> usize {
        self.link.as_ref().map_or(0, Arc::strong_count)
    }

    /// True once the native resource is released (or being released)
    pub fn is_disposed(&self) -> bool {
        self.link
            .as_ref()
            .map_or(false, |l| !l.registration.is_armed())
    }

    pub fn owner(&self) -> Option<Owner> {
        match &self.link {
            Some(link) => link.registration.owner(),
            None => self.owner.clone(),
        }
    }

    /// Borrow the handle for a native call.
    ///
    /// Holds off the cleaner until the guard is dropped. Do not call
    /// `dispose` on this peer while a guard is alive on the same thread.
    pub fn access(&self) -> Result<PeerAccess<'_>> {
        match &self.link {
            None => Ok(PeerAccess {
                handle: self.handle,
                _guard: None,
            }),
            Some(link) => {
                let guard = link.registration.access.read();
                if !link.registration.is_armed() {
                    return Err(InteropError::Disposed {
                        address: self.handle.address(),
                    });
                }
                Ok(PeerAccess {
                    handle: self.handle,
                    _guard: Some(guard),
                })
            }
        }
    }

    /// Release the native resource now. Repeated calls are no-ops.
    pub fn dispose(&self) -> Result<()> {
        match &self.link {
            Some(link) => link.table.dispose(&link.registration),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("handle", &self.handle)
            .field("registration", &self.registration_id())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Read guard over a live peer's handle
pub struct PeerAccess<'a> {
    handle: Handle,
    _guard: Option<RwLockReadGuard<'a, ()>>,
}

impl fmt::Debug for PeerAccess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerAccess")
            .field("handle", &self.handle)
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}

impl PeerAccess<'_> {
    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl std::ops::Deref for PeerAccess<'_> {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}
