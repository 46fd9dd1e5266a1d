//! Module registry and slice-start address set
//!
//! Both are written from arbitrary threads (module loads race with execution,
//! every emission records its marker) and are guarded by a mutex held only
//! for the insert or lookup.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::domain::{Address, ModuleId};

/// A loaded code module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub base: Address,
}

/// Module id → module metadata
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Mutex<BTreeMap<ModuleId, ModuleInfo>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, replacing any earlier module with the same id
    pub fn add(&self, module: ModuleInfo) {
        log::debug!("Module loaded: {} {} at {}", module.id, module.name, module.base);
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.id, module);
    }

    /// Forget a module; blocks that belong to it keep their module id
    pub fn remove(&self, id: ModuleId) -> Option<ModuleInfo> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<ModuleInfo> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    /// All modules ordered by id
    #[must_use]
    pub fn all(&self) -> Vec<ModuleInfo> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }
}

/// Every address ever used as a slice marker, across all threads
#[derive(Debug, Default)]
pub struct SliceStarts {
    addresses: Mutex<HashSet<Address>>,
}

impl SliceStarts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a marker address; returns true if it was not known yet
    pub fn insert(&self, addr: Address) -> bool {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner).insert(addr)
    }

    /// Whether `addr` starts a slice
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner).contains(&addr)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_replace_and_remove() {
        let registry = ModuleRegistry::new();
        registry.add(ModuleInfo { id: ModuleId(1), name: "a.out".into(), base: Address(0x40_0000) });
        registry.add(ModuleInfo { id: ModuleId(1), name: "b.out".into(), base: Address(0x50_0000) });
        assert_eq!(registry.get(ModuleId(1)).unwrap().name, "b.out");
        assert_eq!(registry.all().len(), 1);
        assert!(registry.remove(ModuleId(1)).is_some());
        assert!(registry.get(ModuleId(1)).is_none());
    }

    #[test]
    fn test_slice_starts_dedup() {
        let starts = SliceStarts::new();
        assert!(starts.insert(Address(0x10)));
        assert!(!starts.insert(Address(0x10)));
        assert!(starts.contains(Address(0x10)));
        assert!(!starts.contains(Address(0x20)));
        assert_eq!(starts.len(), 1);
    }
}
