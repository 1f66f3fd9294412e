//! Factory registry (SPI) - proxy factories keyed by managed type or native type name
//!
//! Design: two tables sharing one reader-writer lock. Registration is rare and
//! happens at bring-up; lookups happen on the render path, hold the read lock
//! only long enough to clone the factory, and call it with no lock held so a
//! factory may re-enter the registry.


use parking_lot::RwLock;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handle::Handle;
use crate::logging::log_spi_register;
use crate::peer::Owner;

/// Builds the right proxy `P` for a handle, or declines with `None`
pub type Factory<P> = Arc<dyn Fn(Handle, Option<Owner>) -> Option<P> + Send + Sync>;

struct Tables<P> {
    by_type: HashMap<TypeId, Factory<P>>,
    by_name: HashMap<String, Factory<P>>,
}

/// Registry for one proxy family `P` (e.g. `Box<dyn MapControl>`).
///
/// Declared as a process-wide static by the family that owns it:
///
/// ```ignore
/// static CONTROLS: Lazy<FactoryRegistry<Box<dyn MapControl>>> =
///     Lazy::new(|| FactoryRegistry::new("controls"));
/// ```
pub struct FactoryRegistry<P> {
    name: &'static str,
    tables: RwLock<Tables<P>>,
}

impl<P> FactoryRegistry<P> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tables: RwLock::new(Tables {
                by_type: HashMap::new(),
                by_name: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register `factory` for `T` under the type's full path
    /// (`std::any::type_name`), so same-named types from different modules
    /// keep separate name keys. Replaces any previous factory for either key.
    pub fn register_spi<T, F>(&self, factory: F)
    where
        T: 'static,
        F: Fn(Handle, Option<Owner>) -> Option<P> + Send + Sync + 'static,
    {
        self.insert(TypeId::of::<T>(), type_name::<T>().to_string(), Arc::new(factory));
    }

    /// Register `factory` for `T` under an explicit native type name
    pub fn register_spi_named<T, F>(&self, native_name: &str, factory: F)
    where
        T: 'static,
        F: Fn(Handle, Option<Owner>) -> Option<P> + Send + Sync + 'static,
    {
        self.insert(TypeId::of::<T>(), native_name.to_string(), Arc::new(factory));
    }

    fn insert(&self, type_id: TypeId, native_name: String, factory: Factory<P>) {
        {
            let mut tables = self.tables.write();
            tables.by_type.insert(type_id, factory.clone());
            tables.by_name.insert(native_name.clone(), factory);
        }
        log_spi_register(self.name, &native_name);
    }

    pub fn find<T: 'static>(&self) -> Option<Factory<P>> {
        self.tables.read().by_type.get(&TypeId::of::<T>()).cloned()
    }

    pub fn find_named(&self, native_name: &str) -> Option<Factory<P>> {
        self.tables.read().by_name.get(native_name).cloned()
    }

    /// Build a proxy through the factory registered for `T`.
    /// `None` means the capability is not available.
    pub fn create<T: 'static>(&self, handle: Handle, owner: Option<Owner>) -> Option<P> {
        let factory = self.find::<T>()?;
        factory(handle, owner)
    }

    /// Build a proxy through the factory registered for a native type name
    pub fn create_named(&self, native_name: &str, handle: Handle, owner: Option<Owner>) -> Option<P> {
        let factory = self.find_named(native_name)?;
        factory(handle, owner)
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.tables.read().by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn contains_named(&self, native_name: &str) -> bool {
        self.tables.read().by_name.contains_key(native_name)
    }

    pub fn len_by_type(&self) -> usize {
        self.tables.read().by_type.len()
    }

    pub fn len_by_name(&self) -> usize {
        self.tables.read().by_name.len()
    }

    /// Registered native type names, sorted
    pub fn native_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<P> fmt::Debug for FactoryRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("name", &self.name)
            .field("by_type", &self.len_by_type())
            .field("by_name", &self.len_by_name())
            .finish()
    }
}
