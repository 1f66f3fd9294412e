//! Native resource handles
//!
//! Design: plain value type. Equality and hashing use the address only, so a
//! borrowed view and an owning handle to the same resource compare equal.
//! No validity checks happen here; dereferencing is the native engine's job.

use core::fmt;
use core::hash::{Hash, Hasher};

/// Opaque identifier of a single native-side resource
#[derive(Clone, Copy)]
pub struct Handle {
    address: usize,
    owns: bool,
}

impl Handle {
    /// The null handle (no resource)
    pub const NULL: Handle = Handle { address: 0, owns: false };

    /// Handle that owns the native resource and must be destructed exactly once
    #[inline]
    pub const fn owned(address: usize) -> Self {
        Self { address, owns: true }
    }

    /// Borrowed view of a resource owned elsewhere; never destructed here
    #[inline]
    pub const fn borrowed(address: usize) -> Self {
        Self { address, owns: false }
    }

    /// Build a handle from a raw value handed over by the native side.
    ///
    /// The value is not checked. Whatever dereferences it at the native
    /// boundary is responsible for its validity.
    #[inline]
    pub const fn from_raw_unchecked(address: usize, owns: bool) -> Self {
        Self { address, owns }
    }

    #[inline]
    pub const fn address(self) -> usize {
        self.address
    }

    #[inline]
    pub const fn owns(self) -> bool {
        self.owns
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.address == 0
    }

    /// Same address, ownership dropped
    #[inline]
    pub const fn as_borrowed(self) -> Self {
        Self::borrowed(self.address)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::NULL
    }
}

impl PartialEq for Handle {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x}{})", self.address, if self.owns { "" } else { ", borrowed" })
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:#x}", self.address)
    }
}
