//! Name-keyed object directory shared by every "create X, look it up by
//! name later" surface in the hypervisor command protocol: NIOs, ATM/FR
//! switches, bridges, and NICs are all just values living in one
//! [`Registry<T>`] per kind.
//!
//! Rust's type system already gives per-kind separation for free (a
//! `Registry<AtmSwitch>` can't hand back an `Nio`), so unlike a registry
//! keyed on a runtime type tag, each object kind gets its own registry
//! instance — all sharing this one generic implementation and its locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("object {0:?} already exists")]
    AlreadyExists(String),
    #[error("object {0:?} not found")]
    NotFound(String),
    #[error("object {0:?} is still in use")]
    InUse(String),
}

/// An RAII handle onto a registered object. Cloning a handle is how a
/// caller keeps an object alive past `delete_if_unused`; dropping the last
/// clone (alongside the registry's own reference) is what makes the object
/// eligible for deletion.
pub type Handle<T> = Arc<T>;

/// A name-keyed table of reference-counted objects of a single kind.
pub struct Registry<T> {
    entries: Mutex<HashMap<String, Handle<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `value` under `name`. Fails if the name is already taken.
    pub fn add(&self, name: &str, value: T) -> Result<Handle<T>, RegistryError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        let handle = Arc::new(value);
        entries.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn find(&self, name: &str) -> Option<Handle<T>> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.lock().unwrap().contains_key(name)
    }

    /// Unconditionally drops the registry's own reference to `name`. The
    /// object itself stays alive as long as another caller still holds a
    /// [`Handle`]; callers needing "delete but only if nobody's using it
    /// anymore" should use [`Registry::delete_if_unused`] instead.
    pub fn release(&self, name: &str) -> Result<(), RegistryError> {
        self.entries
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(new_name) {
            return Err(RegistryError::AlreadyExists(new_name.to_string()));
        }
        let handle = entries
            .remove(old_name)
            .ok_or_else(|| RegistryError::NotFound(old_name.to_string()))?;
        entries.insert(new_name.to_string(), handle);
        Ok(())
    }

    /// Removes `name` only if the registry holds the last reference to it.
    /// Returns `Ok(true)` if it was removed, `Ok(false)` if another handle
    /// is still outstanding (the entry is left in place).
    pub fn delete_if_unused(&self, name: &str) -> Result<bool, RegistryError> {
        let mut entries = self.entries.lock().unwrap();
        let handle = entries
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if Arc::strong_count(handle) > 1 {
            return Ok(false);
        }
        entries.remove(name);
        Ok(true)
    }

    pub fn foreach_type<F: FnMut(&str, &Handle<T>)>(&self, mut f: F) {
        let entries = self.entries.lock().unwrap();
        for (name, handle) in entries.iter() {
            f(name, handle);
        }
    }

    /// Unconditionally clears every entry, regardless of outstanding
    /// handles, and returns how many were removed.
    pub fn delete_type(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_find_round_trips() {
        let reg: Registry<u32> = Registry::new();
        reg.add("nio0", 42).unwrap();
        assert_eq!(*reg.find("nio0").unwrap(), 42);
        assert!(reg.exists("nio0"));
        assert!(!reg.exists("nio1"));
    }

    #[test]
    fn add_rejects_duplicate_name() {
        let reg: Registry<u32> = Registry::new();
        reg.add("nio0", 1).unwrap();
        assert_eq!(
            reg.add("nio0", 2),
            Err(RegistryError::AlreadyExists("nio0".to_string()))
        );
    }

    #[test]
    fn rename_moves_entry_and_checks_collisions() {
        let reg: Registry<u32> = Registry::new();
        reg.add("a", 1).unwrap();
        reg.add("b", 2).unwrap();
        assert_eq!(
            reg.rename("a", "b"),
            Err(RegistryError::AlreadyExists("b".to_string()))
        );
        reg.rename("a", "c").unwrap();
        assert!(!reg.exists("a"));
        assert_eq!(*reg.find("c").unwrap(), 1);
    }

    #[test]
    fn delete_if_unused_respects_outstanding_handles() {
        let reg: Registry<u32> = Registry::new();
        let handle = reg.add("nio0", 7).unwrap();
        assert_eq!(reg.delete_if_unused("nio0"), Ok(false));
        drop(handle);
        assert_eq!(reg.delete_if_unused("nio0"), Ok(true));
        assert!(!reg.exists("nio0"));
    }

    #[test]
    fn delete_type_clears_everything_regardless_of_refcount() {
        let reg: Registry<u32> = Registry::new();
        let _held = reg.add("nio0", 1).unwrap();
        reg.add("nio1", 2).unwrap();
        assert_eq!(reg.delete_type(), 2);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn foreach_type_visits_every_entry() {
        let reg: Registry<u32> = Registry::new();
        reg.add("a", 1).unwrap();
        reg.add("b", 2).unwrap();
        let mut sum = 0;
        reg.foreach_type(|_name, value| sum += **value);
        assert_eq!(sum, 3);
    }
}
