//! Error taxonomy for the bridge
//!
//! Lookup misses are `None`, usage warnings are logged. Everything here is a
//! failure the caller has to see.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, InteropError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteropError {
    /// A binding for this managed type was already installed
    #[error("binding already registered for `{type_name}`")]
    DuplicateBinding { type_name: &'static str },

    /// wrap/unwrap/destruct requested for a type nobody registered
    #[error("no binding registered for `{type_name}`")]
    UnknownBinding { type_name: &'static str },

    /// The handle already has a live registration
    #[error("handle {address:#x} is already registered")]
    DoubleRegistration { address: usize },

    /// The handle was already released
    #[error("handle {address:#x} released twice")]
    DoubleRelease { address: usize },

    /// Direct destruct of a handle a live registration will still release
    #[error("handle {address:#x} is still owned by a live registration")]
    StillRegistered { address: usize },

    /// Access through a proxy whose native peer is gone
    #[error("native peer {address:#x} has been disposed")]
    Disposed { address: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to start reclamation thread: {0}")]
    Reclaimer(String),
}

impl InteropError {
    /// Invariant violations: the release-exactly-once guarantee is already broken
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::DoubleRegistration { .. } | Self::DoubleRelease { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = InteropError::DoubleRelease { address: 0x2a };
        assert_eq!(err.to_string(), "handle 0x2a released twice");

        let err = InteropError::StillRegistered { address: 0x7 };
        assert_eq!(err.to_string(), "handle 0x7 is still owned by a live registration");

        let err = InteropError::UnknownBinding { type_name: "Widget" };
        assert_eq!(err.to_string(), "no binding registered for `Widget`");
    }

    #[test]
    fn test_invariant_classification() {
        assert!(InteropError::DoubleRegistration { address: 1 }.is_invariant_violation());
        assert!(InteropError::DoubleRelease { address: 1 }.is_invariant_violation());
        assert!(!InteropError::Disposed { address: 1 }.is_invariant_violation());
        assert!(!InteropError::StillRegistered { address: 1 }.is_invariant_violation());
        assert!(!InteropError::DuplicateBinding { type_name: "T" }.is_invariant_violation());
    }
}
