//! Cleaner protocol
//!
//! A cleaner is the release body of one registration. The peer manager is the
//! only caller, at most once per registration, never concurrently for the same
//! handle.

use std::any::Any;

use crate::handle::Handle;

/// State a proxy passed alongside its handle at registration time.
///
/// Well-formed cleaners own only the handle, so this is normally `None`.
pub type Opaque = Box<dyn Any + Send>;

pub trait Cleaner: Send + Sync {
    /// Release the native resource behind `handle`. Must not panic.
    fn run(&self, handle: Handle, opaque: Option<Opaque>);
}

impl<F> Cleaner for F
where
    F: Fn(Handle, Option<Opaque>) + Send + Sync,
{
    #[inline]
    fn run(&self, handle: Handle, opaque: Option<Opaque>) {
        self(handle, opaque)
    }
}

/// Cleaner that does nothing; for resources whose release is handled natively
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCleaner;

impl Cleaner for NoopCleaner {
    fn run(&self, _handle: Handle, _opaque: Option<Opaque>) {}
}
