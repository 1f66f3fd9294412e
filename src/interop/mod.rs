//! Binding registry - one `Interop<T>` per managed type
//!
//! Design: bindings are installed during subsystem bring-up and only read
//! afterwards, so the table sits behind a reader-writer lock keyed by
//! `TypeId`. Every wrap goes through the registry's `PeerManager`.
//!
//! Architecture:
//! - `binding.rs` - `Interop<T>` (wrap/unwrap/destruct) and its cleaner

mod binding;


pub use binding::{Interop, InteropCleaner};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{InteropError, Result};
use crate::handle::Handle;
use crate::logging::log_binding_register;
use crate::peer::{Owner, PeerManager};
use binding::short_type_name;

static GLOBAL: Lazy<Bindings> = Lazy::new(|| Bindings::new(PeerManager::global().clone()));

type AnyBinding = Arc<dyn Any + Send + Sync>;

pub struct Bindings {
    peers: PeerManager,
    table: RwLock<HashMap<TypeId, AnyBinding>>,
}

impl Bindings {
    pub fn new(peers: PeerManager) -> Self {
        Self {
            peers,
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry, backed by `PeerManager::global()`
    pub fn global() -> &'static Bindings {
        &GLOBAL
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    /// Install the binding for `T`. A second binding for the same type is a
    /// configuration error and leaves the first in place.
    pub fn register<T: 'static>(&self, binding: Interop<T>) -> Result<Arc<Interop<T>>> {
        let type_name = binding.type_name();
        let binding = Arc::new(binding);

        let mut table = self.table.write();
        if table.contains_key(&TypeId::of::<T>()) {
            return Err(InteropError::DuplicateBinding { type_name });
        }
        table.insert(TypeId::of::<T>(), binding.clone() as AnyBinding);
        drop(table);

        log_binding_register(type_name);
        Ok(binding)
    }

    pub fn find<T: 'static>(&self) -> Option<Arc<Interop<T>>> {
        let entry = self.table.read().get(&TypeId::of::<T>()).cloned()?;
        entry.downcast::<Interop<T>>().ok()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.table.read().contains_key(&TypeId::of::<T>())
    }

    fn require<T: 'static>(&self) -> Result<Arc<Interop<T>>> {
        self.find::<T>().ok_or(InteropError::UnknownBinding {
            type_name: short_type_name::<T>(),
        })
    }

    /// Wrap `handle` as a `T` and arm its release
    pub fn wrap<T: 'static>(&self, handle: Handle, owner: Option<Owner>) -> Result<Option<T>> {
        self.require::<T>()?.wrap(&self.peers, handle, owner)
    }

    pub fn unwrap<T: 'static>(&self, proxy: &T) -> Result<Handle> {
        Ok(self.require::<T>()?.unwrap(proxy))
    }

    /// See `Interop::destruct`; application code holding a live proxy should
    /// dispose the proxy instead
    pub fn destruct<T: 'static>(&self, handle: Handle) -> Result<()> {
        self.require::<T>()?.destruct(&self.peers, handle)
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("bindings", &self.len())
            .field("peers", &self.peers)
            .finish()
    }
}
