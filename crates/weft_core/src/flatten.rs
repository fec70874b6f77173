//! The flattener: walks a [`Value`] graph and produces a [`Node`] tree,
//! assigning reference ids to every shared or cyclic object it finds.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::node::{Node, RefId};
use crate::options::Options;
use crate::value::Value;
use crate::version::VersionAdapter;
use crate::{ExternalizerHandle, RegistryHandle};

/// A node's stable identity within one flatten call: a discriminant tag
/// (to keep `List`/`Set`/`Dict`/`Instance` pointer spaces from aliasing
/// each other) plus the allocation's address.
type Key = (u8, usize);

/// `convert` preserves type identity; `freeze` elides it and is one-way.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Convert,
    Freeze,
}

/// Converts live [`Value`] graphs into the intermediate [`Node`] tree.
///
/// Not safe to share across threads while in use — see `spec.md` §5.
pub struct Serializer {
    pub(crate) registry: RegistryHandle,
    pub(crate) externalizer: ExternalizerHandle,
    pub(crate) version_adapter: Option<Rc<VersionAdapter>>,
    pub(crate) source_version: u32,
    pub(crate) target_version: Option<u32>,
    pub(crate) options: Options,
}

impl Serializer {
    pub fn new(registry: RegistryHandle, externalizer: ExternalizerHandle) -> Self {
        Serializer {
            registry,
            externalizer,
            version_adapter: None,
            source_version: 1,
            target_version: None,
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_versions(mut self, source_version: u32, target_version: u32) -> Self {
        self.source_version = source_version;
        self.target_version = Some(target_version);
        self
    }

    pub fn with_version_adapter(mut self, adapter: Rc<VersionAdapter>) -> Self {
        self.version_adapter = Some(adapter);
        self
    }

    /// Flattens `value`, preserving type identity (`Instance` wrappers are
    /// emitted).
    pub fn convert(&self, value: &Value) -> Result<Node> {
        self.run(value, Mode::Convert)
    }

    /// Flattens `value` one-way: `Instance` wrappers are elided, leaving
    /// only their body.
    pub fn freeze(&self, value: &Value) -> Result<Node> {
        self.run(value, Mode::Freeze)
    }

    fn run(&self, value: &Value, mode: Mode) -> Result<Node> {
        let mut pass = Pass {
            ser: self,
            mode,
            counts: HashMap::new(),
            cyclic: HashSet::new(),
            stack: HashSet::new(),
            snapshot_cache: HashMap::new(),
            atom_ids: HashMap::new(),
        };
        pass.discover(value)?;
        let mut ref_ids = HashMap::new();
        let mut next_id: RefId = 1;
        pass.emit(value, &mut ref_ids, &mut next_id)
    }
}

struct Pass<'s> {
    ser: &'s Serializer,
    mode: Mode,
    counts: HashMap<Key, u32>,
    cyclic: HashSet<Key>,
    stack: HashSet<Key>,
    /// Memoizes, per instance, the (possibly version-adapted) type name
    /// and body `snapshot` produced — computed once in discovery, reused
    /// in emission, so `Restorator::snapshot` is called exactly once per
    /// distinct instance regardless of how many times it's reached.
    snapshot_cache: HashMap<Key, (String, Value)>,
    /// Canonical string -> synthetic identity id for atoms, populated
    /// during discovery when `Options::referenceable_atoms` is set. Tag
    /// `5` keeps this id space disjoint from `Value::identity`'s `0..=4`.
    atom_ids: HashMap<String, usize>,
}

/// Canonical key for the atom kinds `Options::referenceable_atoms` covers.
/// `None` for anything else (floats, bytes, text are never atom-tracked).
fn atom_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("n".to_string()),
        Value::Bool(b) => Some(format!("b{b}")),
        Value::Int(i) => Some(format!("i{i}")),
        _ => None,
    }
}

impl<'s> Pass<'s> {
    fn atom_key(&mut self, value: &Value) -> Option<Key> {
        if !self.ser.options.referenceable_atoms {
            return None;
        }
        let s = atom_string(value)?;
        let next = self.atom_ids.len();
        let id = *self.atom_ids.entry(s).or_insert(next);
        Some((5u8, id))
    }

    fn atom_key_ro(&self, value: &Value) -> Option<Key> {
        if !self.ser.options.referenceable_atoms {
            return None;
        }
        let s = atom_string(value)?;
        self.atom_ids.get(&s).map(|&id| (5u8, id))
    }

    fn is_instance_referenceable(&self, type_name: &str) -> Result<(bool, bool)> {
        let restorator = self
            .ser
            .registry
            .borrow()
            .lookup(type_name)
            .map_err(|_| Error::UnserializableType {
                type_name: type_name.to_string(),
            })?;
        Ok((restorator.referenceable(), restorator.immutable()))
    }

    fn discover(&mut self, value: &Value) -> Result<()> {
        let key = match value.identity() {
            Some(key) => key,
            None => match self.atom_key(value) {
                Some(key) => key,
                None => return Ok(()),
            },
        };

        if self.stack.contains(&key) {
            self.cyclic.insert(key);
            *self.counts.entry(key).or_insert(0) += 1;
            return Ok(());
        }

        let first_time = !self.counts.contains_key(&key);
        *self.counts.entry(key).or_insert(0) += 1;
        if !first_time {
            return Ok(());
        }

        self.stack.insert(key);
        let result = self.discover_children(key, value);
        self.stack.remove(&key);
        result?;

        if self.cyclic.contains(&key) {
            if let Value::Instance { type_name, .. } = value {
                let (referenceable, immutable) = self.is_instance_referenceable(type_name)?;
                if immutable || !referenceable {
                    return Err(Error::CyclicImmutable {
                        type_name: type_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn discover_children(&mut self, key: Key, value: &Value) -> Result<()> {
        match value {
            Value::Tuple(items) => {
                for item in items.iter() {
                    self.discover(item)?;
                }
            }
            Value::List(rc) => {
                for item in rc.borrow().iter() {
                    self.discover(item)?;
                }
            }
            Value::Set(rc) => {
                for item in rc.borrow().iter() {
                    self.discover(item)?;
                }
            }
            Value::Dict(rc) => {
                for (k, v) in rc.borrow().iter() {
                    self.discover(k)?;
                    self.discover(v)?;
                }
            }
            Value::Instance { type_name, instance } => {
                if self.ser.externalizer.borrow().lookup_by_instance(instance).is_some() {
                    return Ok(());
                }
                let restorator = self
                    .ser
                    .registry
                    .borrow()
                    .lookup(type_name)
                    .map_err(|_| Error::UnserializableType {
                        type_name: type_name.clone(),
                    })?;
                let native_version = restorator.native_version();
                let body = restorator.snapshot(instance)?;
                let (adapted_name, adapted_body) =
                    self.adapt_for_target(type_name, body, native_version)?;
                self.discover(&adapted_body)?;
                self.snapshot_cache.insert(key, (adapted_name, adapted_body));
            }
            _ => {}
        }
        Ok(())
    }

    fn adapt_for_target(&self, type_name: &str, body: Value, native_version: u32) -> Result<(String, Value)> {
        match self.ser.target_version {
            Some(target) if target != native_version => {
                let adapted = match &self.ser.version_adapter {
                    Some(adapter) => {
                        adapter
                            .adapt(type_name, body, native_version, target)?
                            .0
                    }
                    None => body,
                };
                Ok((type_name.to_string(), adapted))
            }
            _ => Ok((type_name.to_string(), body)),
        }
    }

    fn emit(&self, value: &Value, ref_ids: &mut HashMap<Key, RefId>, next_id: &mut RefId) -> Result<Node> {
        let key = match value.identity() {
            Some(key) => key,
            None => match self.atom_key_ro(value) {
                Some(key) => key,
                None => return self.build_inner(value, ref_ids, next_id),
            },
        };

        if let Some(&id) = ref_ids.get(&key) {
            return Ok(Node::Dereference(id));
        }

        let referenceable = match value {
            Value::Instance { type_name, instance } => {
                if self.ser.externalizer.borrow().lookup_by_instance(instance).is_some() {
                    // Identity for an external is carried by its stable_id, not
                    // by a Reference/Dereference wrapper around it.
                    false
                } else {
                    self.is_instance_referenceable(type_name)?.0
                }
            }
            _ => true,
        };
        let count = *self.counts.get(&key).unwrap_or(&0);
        let cyclic = self.cyclic.contains(&key);
        let will_wrap = referenceable && (count >= 2 || cyclic);

        let reserved_id = if will_wrap {
            let id = *next_id;
            *next_id += 1;
            ref_ids.insert(key, id);
            Some(id)
        } else {
            None
        };

        let inner = self.build_inner(value, ref_ids, next_id)?;
        match reserved_id {
            Some(id) => Ok(Node::Reference { id, inner: Box::new(inner) }),
            None => Ok(inner),
        }
    }

    fn build_inner(&self, value: &Value, ref_ids: &mut HashMap<Key, RefId>, next_id: &mut RefId) -> Result<Node> {
        match value {
            Value::Null => Ok(Node::Null),
            Value::Bool(b) => Ok(Node::Bool(*b)),
            Value::Int(i) => Ok(Node::Int(i.clone())),
            Value::Float(f) => Ok(Node::Float(*f)),
            Value::Bytes(b) => Ok(Node::Bytes(b.clone())),
            Value::Text(s) => Ok(Node::Text(s.clone())),
            Value::TypeRef(n) => Ok(Node::TypeRef(n.clone())),
            Value::EnumRef(n) => Ok(Node::EnumRef(n.clone())),
            Value::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(self.emit(item, ref_ids, next_id)?);
                }
                Ok(Node::Tuple(out))
            }
            Value::List(rc) => {
                let items = rc.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(self.emit(item, ref_ids, next_id)?);
                }
                Ok(Node::List(out))
            }
            Value::Set(rc) => {
                let items = rc.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(self.emit(item, ref_ids, next_id)?);
                }
                Ok(Node::Set(out))
            }
            Value::Dict(rc) => {
                let items = rc.borrow();
                let mut out = Vec::with_capacity(items.len());
                for (k, v) in items.iter() {
                    out.push((self.emit(k, ref_ids, next_id)?, self.emit(v, ref_ids, next_id)?));
                }
                if self.ser.options.sort_keys {
                    out.sort_by(|a, b| crate::node::sort_key(&a.0).cmp(&crate::node::sort_key(&b.0)));
                }
                Ok(Node::Dict(out))
            }
            Value::Instance { type_name, instance } => self.build_instance(type_name, instance, ref_ids, next_id),
            Value::UnknownInstance { type_name, body } => {
                let body_node = self.emit(body, ref_ids, next_id)?;
                Ok(Node::Instance {
                    type_name: type_name.clone(),
                    body: Box::new(body_node),
                    version: None,
                })
            }
        }
    }

    fn build_instance(
        &self,
        type_name: &str,
        instance: &crate::value::Instance,
        ref_ids: &mut HashMap<Key, RefId>,
        next_id: &mut RefId,
    ) -> Result<Node> {
        if let Some((ext_type, stable_id)) = self.ser.externalizer.borrow().lookup_by_instance(instance) {
            return Ok(Node::External {
                type_name: ext_type.to_string(),
                stable_id: stable_id.to_string(),
            });
        }

        let key = (4u8, instance.identity());
        let (adapted_name, body) = self
            .snapshot_cache
            .get(&key)
            .cloned()
            .expect("snapshot cached during discovery");
        let body_node = self.emit(&body, ref_ids, next_id)?;

        match self.mode {
            Mode::Freeze => Ok(body_node),
            Mode::Convert => {
                let restorator = self.ser.registry.borrow().lookup(type_name).map_err(|_| {
                    Error::UnserializableType {
                        type_name: type_name.to_string(),
                    }
                })?;
                let version = match self.ser.target_version {
                    Some(target) if target != restorator.native_version() => Some(target),
                    _ => None,
                };
                Ok(Node::Instance {
                    type_name: adapted_name,
                    body: Box::new(body_node),
                    version,
                })
            }
        }
    }
}
