//! Identity marshaller
//!
//! Bidirectional value/index table used to rebuild every constant pool. Ids
//! are handed out in first-registration order, after the seed values.

use std::fmt;
use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::error::{AbcError, Result};

/// Value to dense index table with stable first-touch ordering
#[derive(Clone)]
pub struct Marshaller<K> {
    ids: FxHashMap<K, u32>,
    values: Vec<K>,
}

impl<K: Eq + Hash + Clone> Default for Marshaller<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Marshaller<K> {
    /// Create an empty marshaller
    pub fn new() -> Self {
        Self {
            ids: FxHashMap::default(),
            values: Vec::new(),
        }
    }

    /// Create a marshaller whose first ids belong to `seeds`, in order
    pub fn with_seeds(seeds: impl IntoIterator<Item = K>) -> Self {
        let mut marshaller = Self::new();
        for seed in seeds {
            marshaller.register(seed);
        }
        marshaller
    }

    /// Register a value; registering a known value is a no-op
    ///
    /// Returns the value's id either way.
    pub fn register(&mut self, value: K) -> u32 {
        if let Some(&id) = self.ids.get(&value) {
            return id;
        }
        let id = self.values.len() as u32;
        self.values.push(value.clone());
        self.ids.insert(value, id);
        id
    }

    /// Id of `value`, registering it first if needed
    pub fn id_for(&mut self, value: &K) -> u32 {
        match self.ids.get(value) {
            Some(&id) => id,
            None => self.register(value.clone()),
        }
    }

    /// Id of an already registered value
    ///
    /// Used once registration is complete; an unknown value is a bug in the
    /// registration walk.
    pub fn id_for_existing(&self, value: &K) -> Result<u32>
    where
        K: fmt::Debug,
    {
        self.ids.get(value).copied().ok_or_else(|| {
            AbcError::construction(format!("value was never registered: {value:?}"))
        })
    }

    /// Check whether `value` has an id
    pub fn contains(&self, value: &K) -> bool {
        self.ids.contains_key(value)
    }

    /// Registered values, seeds first, then in registration order
    pub fn values_in_order(&self) -> &[K] {
        &self.values
    }

    /// Consume the marshaller, returning its values in id order
    pub fn into_values(self) -> Vec<K> {
        self.values
    }

    /// Number of registered values, seeds included
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: fmt::Debug> fmt::Debug for Marshaller<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.values).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut m = Marshaller::new();
        let a = m.register("a");
        assert_eq!(m.register("a"), a);
        assert_eq!(m.id_for(&"a"), a);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_seeds_come_first() {
        let mut m = Marshaller::with_seeds([None, Some("*")]);
        assert_eq!(m.id_for(&Some("x")), 2);
        assert_eq!(m.id_for(&None), 0);
        assert_eq!(m.values_in_order(), &[None, Some("*"), Some("x")]);
    }

    #[test]
    fn test_first_registration_order() {
        let mut m = Marshaller::with_seeds([0]);
        for v in [5, 3, 5, 9, 3] {
            m.register(v);
        }
        assert_eq!(m.into_values(), vec![0, 5, 3, 9]);
    }

    #[test]
    fn test_id_for_existing_rejects_unknown() {
        let m = Marshaller::with_seeds(["seed"]);
        assert_eq!(m.id_for_existing(&"seed").unwrap(), 0);
        let err = m.id_for_existing(&"missing").unwrap_err();
        assert!(matches!(err, AbcError::Construction(_)));
        assert!(!m.contains(&"missing"));
    }
}
