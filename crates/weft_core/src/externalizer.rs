//! A lookup table of pre-registered long-lived objects, identified by
//! `(type_name, stable_id)` rather than serialized by value.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Instance;

/// Holds the mapping `(type_name, stable_id) -> object` in both
/// directions: the flattener consults it before structurally serializing
/// an instance, and the unflattener resolves `External` nodes back through
/// it.
#[derive(Default)]
pub struct Externalizer {
    by_id: HashMap<(String, String), Instance>,
    by_identity: HashMap<usize, (String, String)>,
}

impl Externalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` as externalizable under `(type_name, stable_id)`.
    pub fn add(&mut self, type_name: impl Into<String>, stable_id: impl Into<String>, instance: Instance) {
        let key = (type_name.into(), stable_id.into());
        self.by_identity.insert(instance.identity(), key.clone());
        self.by_id.insert(key, instance);
    }

    /// Returns the `(type_name, stable_id)` pair `instance` was registered
    /// under, if any — consulted by the flattener before it would
    /// otherwise snapshot the instance structurally.
    pub fn lookup_by_instance(&self, instance: &Instance) -> Option<(&str, &str)> {
        self.by_identity
            .get(&instance.identity())
            .map(|(t, s)| (t.as_str(), s.as_str()))
    }

    /// Resolves an `External` node back to its registered object.
    pub fn resolve(&self, type_name: &str, stable_id: &str) -> Result<Instance> {
        self.by_id
            .get(&(type_name.to_string(), stable_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::UnknownExternal {
                type_name: type_name.to_string(),
                stable_id: stable_id.to_string(),
            })
    }
}
