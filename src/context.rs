//! Current-context binding - which native context this thread is operating in
//!
//! Design: one thread-local slot per thread, never shared. Setting it also
//! publishes the context's handle to the native side (thread-local address
//! plus an optional engine hook) so callbacks made synchronously on this
//! thread can find their context without it being passed down every frame.
//!
//! `ExecutionScope` is the explicit alternative: carry the context as a value
//! and only make it current around the native calls that need it.

use once_cell::sync::OnceCell;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::handle::Handle;
use crate::logging::log_context_switch;

/// A native rendering/resource context
pub trait NativeContext: Send + Sync + 'static {
    fn handle(&self) -> Handle;
}

pub type ContextRef = Arc<dyn NativeContext>;

/// Engine callback notified with the handle made current on the calling thread
pub type NativeHook = fn(Handle);

static NATIVE_HOOK: OnceCell<NativeHook> = OnceCell::new();

thread_local! {
    static CURRENT: RefCell<Option<ContextRef>> = const { RefCell::new(None) };
    static NATIVE_CURRENT: Cell<usize> = const { Cell::new(0) };
}

/// Install the engine's propagation hook. Returns false if one is already set.
pub fn install_native_hook(hook: NativeHook) -> bool {
    NATIVE_HOOK.set(hook).is_ok()
}

/// Make `context` current on this thread (or clear it with `None`).
/// Returns the previous context.
pub fn set_current(context: Option<ContextRef>) -> Option<ContextRef> {
    let handle = context.as_ref().map_or(Handle::NULL, |c| c.handle());
    let previous = CURRENT.with(|slot| slot.replace(context));
    publish(handle);
    previous
}

/// The context this thread set, if any
pub fn get_current() -> Option<ContextRef> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Handle of the current context as seen by the native side (null if unset)
pub fn current_handle() -> Handle {
    NATIVE_CURRENT.with(|cell| Handle::borrowed(cell.get()))
}

fn publish(handle: Handle) {
    NATIVE_CURRENT.with(|cell| cell.set(handle.address()));
    if let Some(hook) = NATIVE_HOOK.get() {
        hook(handle.as_borrowed());
    }
    log_context_switch(handle);
}

/// Make `context` current until the guard drops, then restore the previous one
pub fn scope(context: ContextRef) -> ContextScope {
    let previous = set_current(Some(context));
    ContextScope {
        previous,
        _not_send: PhantomData,
    }
}

/// Run `f` with `context` current
pub fn with<R>(context: ContextRef, f: impl FnOnce() -> R) -> R {
    let _scope = scope(context);
    f()
}

/// RAII guard from `scope`; tied to the thread that created it
#[must_use = "the previous context is restored when the guard drops"]
pub struct ContextScope {
    previous: Option<ContextRef>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        set_current(self.previous.take());
    }
}

/// Explicitly passed execution context
#[derive(Clone)]
pub struct ExecutionScope {
    context: ContextRef,
}

impl ExecutionScope {
    pub fn new(context: ContextRef) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    pub fn handle(&self) -> Handle {
        self.context.handle()
    }

    /// Make this scope's context current for nested native calls
    pub fn enter(&self) -> ContextScope {
        scope(self.context.clone())
    }

    pub fn run<R>(&self, f: impl FnOnce(&ContextRef) -> R) -> R {
        let _scope = self.enter();
        f(&self.context)
    }
}

impl fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("handle", &self.handle())
            .finish()
    }
}
