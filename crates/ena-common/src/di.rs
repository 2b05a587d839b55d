//! Service registration for auto-discovery
//!
//! Each crate builds its long-lived services in a factory function and submits
//! it with `inventory::submit!`. The host application calls
//! [`collect_all_services`] once at startup and hands the resulting handles to
//! whoever needs them, so no crate has to keep a process-wide singleton.
//!
//! ```rust,ignore
//! use ena_common::di::{ServiceEntry, ServiceFactory};
//! use std::sync::Arc;
//!
//! inventory::submit! {
//!     ServiceFactory::new("undo", create_undo_services)
//! }
//!
//! fn create_undo_services() -> Vec<ServiceEntry> {
//!     vec![ServiceEntry::new::<UndoManager>(Arc::new(manager))]
//! }
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;

use tracing::{debug, info};

/// A type-erased service instance produced by a factory
pub struct ServiceEntry {
    /// Registration key
    pub type_id: TypeId,

    /// Human-readable type name for diagnostics
    pub type_name: &'static str,

    /// The service instance
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl ServiceEntry {
    /// Wrap a concrete service
    pub fn new<T: Send + Sync + 'static>(instance: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            instance: instance as Arc<dyn Any + Send + Sync>,
        }
    }

    /// Recover the concrete service if this entry holds a `T`
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("type_id", &self.type_id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// A named factory submitted by a crate
pub struct ServiceFactory {
    /// Name of the service group (e.g. "undo")
    pub name: &'static str,

    /// Builds the group's services
    pub factory_fn: fn() -> Vec<ServiceEntry>,

    /// Registration order, lower runs first
    pub priority: u32,
}

impl ServiceFactory {
    /// Factory with the default priority (100)
    pub const fn new(name: &'static str, factory_fn: fn() -> Vec<ServiceEntry>) -> Self {
        Self {
            name,
            factory_fn,
            priority: 100,
        }
    }

    /// Factory with an explicit priority
    pub const fn with_priority(
        name: &'static str,
        factory_fn: fn() -> Vec<ServiceEntry>,
        priority: u32,
    ) -> Self {
        Self {
            name,
            factory_fn,
            priority,
        }
    }
}

inventory::collect!(ServiceFactory);

/// Run every submitted factory in priority order and gather their services
pub fn collect_all_services() -> Vec<ServiceEntry> {
    let mut factories: Vec<&ServiceFactory> = inventory::iter::<ServiceFactory>().collect();
    factories.sort_by_key(|f| f.priority);

    info!(factories = factories.len(), "Discovered service factories");

    let mut all_services = Vec::new();
    for factory in factories {
        let services = (factory.factory_fn)();
        debug!(
            factory = factory.name,
            priority = factory.priority,
            services = services.len(),
            "Factory created services"
        );
        all_services.extend(services);
    }

    all_services
}

/// Find the first collected service of type `T`
pub fn resolve<T: Send + Sync + 'static>(services: &[ServiceEntry]) -> Option<Arc<T>> {
    services
        .iter()
        .filter(|entry| entry.type_id == TypeId::of::<T>())
        .find_map(|entry| entry.downcast::<T>())
}

/// Names of all submitted factories
pub fn list_discovered_factories() -> Vec<&'static str> {
    inventory::iter::<ServiceFactory>().map(|f| f.name).collect()
}
