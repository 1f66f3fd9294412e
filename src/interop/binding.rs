//! One binding: the wrap/unwrap/destruct triple for a managed type

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::error::{InteropError, Result};
use crate::handle::Handle;
use crate::logging::{debug, log_invariant_violation, log_wrap, warn};
use crate::peer::{Cleaner, Opaque, Owner, Peer, PeerManager};

type WrapFn<T> = Box<dyn Fn(&Peer) -> Option<T> + Send + Sync>;
type UnwrapFn<T> = Box<dyn Fn(&T) -> Handle + Send + Sync>;
type DestructFn = Box<dyn Fn(Handle) + Send + Sync>;

/// Marshals between native handles and proxies of type `T`
pub struct Interop<T> {
    type_name: &'static str,
    wrap: WrapFn<T>,
    unwrap: UnwrapFn<T>,
    destruct: DestructFn,
}

impl<T: 'static> Interop<T> {
    /// `wrap` builds the proxy around a peer token, `unwrap` reads the handle
    /// back, `destruct` frees the native resource.
    ///
    /// The proxy must store a clone of the `Peer` it is given. The token is
    /// what keeps the registration armed: a proxy that copies only
    /// `peer.handle()` lets the last clone drop when `wrap` returns, and the
    /// native resource is queued for release while the proxy is still in
    /// use. Such wraps are counted in `PeerStats::unretained_warnings`.
    ///
    /// ```ignore
    /// Interop::new(
    ///     |peer: &Peer| Some(Widget { peer: peer.clone() }),
    ///     |w: &Widget| w.peer.handle(),
    ///     |h| engine::widget_destroy(h),
    /// )
    /// ```
    pub fn new<W, U, D>(wrap: W, unwrap: U, destruct: D) -> Self
    where
        W: Fn(&Peer) -> Option<T> + Send + Sync + 'static,
        U: Fn(&T) -> Handle + Send + Sync + 'static,
        D: Fn(Handle) + Send + Sync + 'static,
    {
        Self {
            type_name: short_type_name::<T>(),
            wrap: Box::new(wrap),
            unwrap: Box::new(unwrap),
            destruct: Box::new(destruct),
        }
    }

    /// Override the name used in logs and errors
    pub fn named(mut self, type_name: &'static str) -> Self {
        self.type_name = type_name;
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Wrap `handle` and arm its release.
    ///
    /// Null handles give `None`. When the wrap function declines, the
    /// provisional registration is dropped without destructing and the
    /// handle stays with the caller.
    pub fn wrap(
        self: &Arc<Self>,
        peers: &PeerManager,
        handle: Handle,
        owner: Option<Owner>,
    ) -> Result<Option<T>> {
        if handle.is_null() {
            return Ok(None);
        }

        let cleaner: Arc<dyn Cleaner> = Arc::new(InteropCleaner {
            binding: self.clone(),
        });
        let peer = peers.register(handle, cleaner, None, owner)?;

        match (self.wrap)(&peer) {
            Some(proxy) => {
                if peer.is_managed() && peer.clone_count() == 1 {
                    peers.note_unretained(handle);
                }
                log_wrap(self.type_name, handle);
                Ok(Some(proxy))
            }
            None => {
                debug!(
                    type_name = self.type_name,
                    address = handle.address(),
                    "Wrap declined; handle left with caller"
                );
                peers.abandon(&peer);
                Ok(None)
            }
        }
    }

    /// Read the handle out of a proxy. No effect on registration state.
    #[inline]
    pub fn unwrap(&self, proxy: &T) -> Handle {
        (self.unwrap)(proxy)
    }

    pub fn has_handle(&self, proxy: &T) -> bool {
        !self.unwrap(proxy).is_null()
    }

    /// Destruct a handle that no registration covers.
    ///
    /// Fails with `StillRegistered` while a registration owns the handle and
    /// with `DoubleRelease` once the handle was released through `peers`
    /// (by a cleaner or an earlier destruct). Borrowed handles are never
    /// destructed.
    pub fn destruct(&self, peers: &PeerManager, handle: Handle) -> Result<()> {
        if !handle.owns() || handle.is_null() {
            debug!(
                type_name = self.type_name,
                address = handle.address(),
                "Ignoring destruct of non-owning handle"
            );
            return Ok(());
        }
        if peers.is_registered(handle) {
            warn!(
                type_name = self.type_name,
                address = handle.address(),
                "Destruct refused: handle still owned by a live registration"
            );
            return Err(InteropError::StillRegistered {
                address: handle.address(),
            });
        }
        if !peers.mark_released(handle) {
            log_invariant_violation("double release", handle);
            return Err(InteropError::DoubleRelease {
                address: handle.address(),
            });
        }
        self.destruct_unchecked(handle);
        Ok(())
    }

    #[inline]
    pub(crate) fn destruct_unchecked(&self, handle: Handle) {
        (self.destruct)(handle)
    }
}

impl<T> fmt::Debug for Interop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interop")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Default cleaner for wrapped handles: runs the binding's destruct
pub struct InteropCleaner<T> {
    binding: Arc<Interop<T>>,
}

impl<T: 'static> InteropCleaner<T> {
    pub fn new(binding: Arc<Interop<T>>) -> Self {
        Self { binding }
    }
}

impl<T: 'static> Cleaner for InteropCleaner<T> {
    fn run(&self, handle: Handle, _opaque: Option<Opaque>) {
        self.binding.destruct_unchecked(handle);
    }
}

/// `a::b::Widget<c::D>` -> `Widget<c::D>`
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    struct Generic<T>(T);

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<Plain>(), "Plain");
        assert_eq!(short_type_name::<u32>(), "u32");
        assert!(short_type_name::<Generic<Plain>>().starts_with("Generic<"));
    }
}
