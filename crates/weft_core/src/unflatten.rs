//! The unflattener: consumes a [`Node`] tree and reconstructs graph
//! topology, including cycles, invoking restorators as it goes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::node::{Node, RefId};
use crate::options::Options;
use crate::registry::Restorator;
use crate::value::{Instance, Value};
use crate::version::VersionAdapter;
use crate::{ExternalizerHandle, RegistryHandle};

/// Converts [`Node`] trees back into live [`Value`] graphs.
///
/// Not safe to share across threads while in use — see `spec.md` §5.
pub struct Unserializer {
    registry: RegistryHandle,
    externalizer: ExternalizerHandle,
    version_adapter: Option<Rc<VersionAdapter>>,
    source_version: u32,
    target_version: Option<u32>,
    options: Options,
}

impl Unserializer {
    pub fn new(registry: RegistryHandle, externalizer: ExternalizerHandle) -> Self {
        Unserializer {
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

    /// `source_version` is the version assumed for an `Instance` node that
    /// carries no explicit version tag. `target_version` is the version
    /// recovered instances should end up at; when absent, each type's own
    /// `Restorator::native_version` is used.
    pub fn with_versions(mut self, source_version: u32, target_version: u32) -> Self {
        self.source_version = source_version;
        self.target_version = Some(target_version);
        self
    }

    pub fn with_version_adapter(mut self, adapter: Rc<VersionAdapter>) -> Self {
        self.version_adapter = Some(adapter);
        self
    }

    pub fn convert(&self, node: &Node) -> Result<Value> {
        let mut decoder = Decoder {
            uns: self,
            ref_table: HashMap::new(),
            declared: HashSet::new(),
            pending_immutable: HashSet::new(),
            restored_queue: Vec::new(),
        };
        let value = decoder.decode(node)?;
        for (restorator, instance) in decoder.restored_queue.drain(..) {
            restorator.restored(&instance)?;
        }
        Ok(value)
    }
}

struct Decoder<'u> {
    uns: &'u Unserializer,
    ref_table: HashMap<RefId, Value>,
    /// Ids for which a `Reference` has already been seen — detects
    /// `DuplicateReference`.
    declared: HashSet<RefId>,
    /// Ids currently being constructed as an immutable `Tuple`, which
    /// cannot be pre-registered in `ref_table` before it's fully built. A
    /// `Dereference` landing on one of these is a cycle through an
    /// immutable container.
    pending_immutable: HashSet<RefId>,
    /// `(restorator, instance)` pairs in the order their `recover` call
    /// completed — `restored` fires in this order after decoding finishes.
    restored_queue: Vec<(Rc<dyn Restorator>, Instance)>,
}

impl<'u> Decoder<'u> {
    fn decode(&mut self, node: &Node) -> Result<Value> {
        match node {
            Node::Null => Ok(Value::Null),
            Node::Bool(b) => Ok(Value::Bool(*b)),
            Node::Int(i) => Ok(Value::Int(i.clone())),
            Node::Float(f) => Ok(Value::Float(*f)),
            Node::Bytes(b) => Ok(Value::Bytes(b.clone())),
            Node::Text(s) => Ok(Value::Text(s.clone())),
            Node::TypeRef(n) => Ok(Value::TypeRef(n.clone())),
            Node::EnumRef(n) => Ok(Value::EnumRef(n.clone())),
            Node::External { type_name, stable_id } => {
                let instance = self.uns.externalizer.borrow().resolve(type_name, stable_id)?;
                Ok(Value::Instance {
                    type_name: type_name.clone(),
                    instance,
                })
            }
            Node::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.decode(item)?);
                }
                Ok(Value::tuple(out))
            }
            Node::List(items) => {
                let container = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                for item in items {
                    let v = self.decode(item)?;
                    container.borrow_mut().push(v);
                }
                Ok(Value::List(container))
            }
            Node::Set(items) => {
                let container = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                for item in items {
                    let v = self.decode(item)?;
                    container.borrow_mut().push(v);
                }
                Ok(Value::Set(container))
            }
            Node::Dict(pairs) => {
                let container = Rc::new(RefCell::new(Vec::with_capacity(pairs.len())));
                for (k, v) in pairs {
                    let kv = self.decode(k)?;
                    let vv = self.decode(v)?;
                    container.borrow_mut().push((kv, vv));
                }
                Ok(Value::Dict(container))
            }
            Node::Instance { type_name, body, version } => {
                self.decode_instance(type_name, body, *version, None)
            }
            Node::Reference { id, inner } => self.decode_reference(*id, inner),
            Node::Dereference(id) => self.resolve_dereference(*id),
        }
    }

    fn decode_reference(&mut self, id: RefId, inner: &Node) -> Result<Value> {
        if !self.declared.insert(id) {
            return Err(Error::DuplicateReference(id));
        }
        match inner {
            Node::List(items) => {
                let container = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                self.ref_table.insert(id, Value::List(container.clone()));
                for item in items {
                    let v = self.decode(item)?;
                    container.borrow_mut().push(v);
                }
                Ok(Value::List(container))
            }
            Node::Set(items) => {
                let container = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                self.ref_table.insert(id, Value::Set(container.clone()));
                for item in items {
                    let v = self.decode(item)?;
                    container.borrow_mut().push(v);
                }
                Ok(Value::Set(container))
            }
            Node::Dict(pairs) => {
                let container = Rc::new(RefCell::new(Vec::with_capacity(pairs.len())));
                self.ref_table.insert(id, Value::Dict(container.clone()));
                for (k, v) in pairs {
                    let kv = self.decode(k)?;
                    let vv = self.decode(v)?;
                    container.borrow_mut().push((kv, vv));
                }
                Ok(Value::Dict(container))
            }
            Node::Tuple(items) => {
                // Immutable: cannot be registered before it's fully built.
                // A `Dereference(id)` seen while it's in `pending_immutable`
                // is a cycle through an immutable container.
                self.pending_immutable.insert(id);
                let mut out = Vec::with_capacity(items.len());
                let build = (|| {
                    for item in items {
                        out.push(self.decode(item)?);
                    }
                    Ok::<(), Error>(())
                })();
                self.pending_immutable.remove(&id);
                build?;
                let value = Value::tuple(out);
                self.ref_table.insert(id, value.clone());
                Ok(value)
            }
            Node::Instance { type_name, body, version } => {
                self.decode_instance(type_name, body, *version, Some(id))
            }
            other => {
                // A reference around an atom (producer used
                // `referenceable_atoms`); decode and register it plainly.
                let value = self.decode(other)?;
                self.ref_table.insert(id, value.clone());
                Ok(value)
            }
        }
    }

    fn resolve_dereference(&self, id: RefId) -> Result<Value> {
        if self.pending_immutable.contains(&id) {
            return Err(Error::CyclicImmutable {
                type_name: format!("<tuple #{id}>"),
            });
        }
        self.ref_table
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownReference(id))
    }

    fn decode_instance(
        &mut self,
        type_name: &str,
        body: &Node,
        version: Option<u32>,
        ref_id: Option<RefId>,
    ) -> Result<Value> {
        let restorator = match self.uns.registry.borrow().lookup(type_name) {
            Ok(r) => r,
            Err(e) => {
                if self.uns.options.strict_unknown {
                    return Err(e);
                }
                let decoded_body = self.decode(body)?;
                let value = Value::UnknownInstance {
                    type_name: type_name.to_string(),
                    body: Box::new(decoded_body),
                };
                if let Some(id) = ref_id {
                    self.ref_table.insert(id, value.clone());
                }
                return Ok(value);
            }
        };

        let skeleton = restorator.prepare();
        if let Some(id) = ref_id {
            self.ref_table.insert(
                id,
                Value::Instance {
                    type_name: type_name.to_string(),
                    instance: skeleton.clone(),
                },
            );
        }

        let decoded_body = self.decode(body)?;

        let wire_version = version.unwrap_or(self.uns.source_version);
        let target = self.uns.target_version.unwrap_or_else(|| restorator.native_version());
        let adapted_body = if wire_version != target {
            match &self.uns.version_adapter {
                Some(adapter) => adapter.adapt(type_name, decoded_body, wire_version, target)?.0,
                None => decoded_body,
            }
        } else {
            decoded_body
        };

        restorator.recover(&skeleton, adapted_body)?;
        self.restored_queue.push((restorator.clone(), skeleton.clone()));

        Ok(Value::Instance {
            type_name: type_name.to_string(),
            instance: skeleton,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::Serializer;
    use crate::node::Node;
    use crate::options::Options;
    use crate::registry::Registry;
    use crate::value::{Instance, Value};
    use num_bigint::BigInt;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn new_handles() -> (RegistryHandle, ExternalizerHandle) {
        (
            Rc::new(RefCell::new(Registry::new())),
            Rc::new(RefCell::new(crate::externalizer::Externalizer::new())),
        )
    }

    fn round_trip(value: &Value, registry: RegistryHandle, externalizer: ExternalizerHandle) -> Value {
        let ser = Serializer::new(registry.clone(), externalizer.clone());
        let node = ser.convert(value).unwrap();
        let uns = Unserializer::new(registry, externalizer);
        uns.convert(&node).unwrap()
    }

    fn list_len(value: &Value) -> usize {
        match value {
            Value::List(rc) => rc.borrow().len(),
            _ => panic!("expected a list"),
        }
    }

    /// Scenario 1: `a=[]; [a,a]` — two elements aliasing one empty list.
    #[test]
    fn shared_empty_list_round_trips_as_one_aliased_object() {
        let (registry, externalizer) = new_handles();
        let a = Value::list(vec![]);
        let top = Value::list(vec![a.clone(), a.clone()]);

        let ser = Serializer::new(registry.clone(), externalizer.clone());
        let node = ser.convert(&top).unwrap();
        match &node {
            Node::List(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[0], Node::Reference { id: 1, .. }));
                assert!(matches!(items[1], Node::Dereference(1)));
            }
            other => panic!("expected a list, got {other:?}"),
        }

        let uns = Unserializer::new(registry, externalizer);
        let restored = uns.convert(&node).unwrap();
        match restored {
            Value::List(rc) => {
                let items = rc.borrow();
                assert_eq!(items.len(), 2);
                assert_eq!(list_len(&items[0]), 0);
                match (&items[0], &items[1]) {
                    (Value::List(x), Value::List(y)) => assert!(Rc::ptr_eq(x, y)),
                    _ => panic!("expected two list handles"),
                }
            }
            _ => panic!("expected a list"),
        }
    }

    /// Scenario 2: `a=[]; a.append(a)` — a self-referential list.
    #[test]
    fn self_referential_list_round_trips() {
        let (registry, externalizer) = new_handles();
        let a = Value::list(vec![]);
        if let Value::List(rc) = &a {
            rc.borrow_mut().push(a.clone());
        }

        let ser = Serializer::new(registry.clone(), externalizer.clone());
        let node = ser.convert(&a).unwrap();
        match &node {
            Node::Reference { id: 1, inner } => {
                assert!(matches!(inner.as_ref(), Node::List(items) if matches!(items[0], Node::Dereference(1))));
            }
            other => panic!("expected a self-referential Reference, got {other:?}"),
        }

        let uns = Unserializer::new(registry, externalizer);
        let restored = uns.convert(&node).unwrap();
        match &restored {
            Value::List(rc) => {
                let items = rc.borrow();
                assert_eq!(items.len(), 1);
                match &items[0] {
                    Value::List(inner) => assert!(Rc::ptr_eq(inner, rc)),
                    other => panic!("expected the list to contain itself, got {other:?}"),
                }
            }
            other => panic!("expected a list, got {other:?}"),
        }
    }

    struct LinkNode {
        next: Option<Instance>,
    }

    struct LinkNodeRestorator;

    impl Restorator for LinkNodeRestorator {
        fn type_name(&self) -> &str {
            "test.LinkNode"
        }

        fn snapshot(&self, instance: &Instance) -> Result<Value> {
            instance
                .with::<LinkNode, Value>(|n| match &n.next {
                    Some(next) => Value::dict(vec![(
                        Value::Text("next".into()),
                        Value::Instance {
                            type_name: "test.LinkNode".into(),
                            instance: next.clone(),
                        },
                    )]),
                    None => Value::dict(vec![]),
                })
                .ok_or_else(|| Error::UnserializableType {
                    type_name: "test.LinkNode".into(),
                })
        }

        fn prepare(&self) -> Instance {
            Instance::new(LinkNode { next: None })
        }

        fn recover(&self, skeleton: &Instance, body: Value) -> Result<()> {
            let Value::Dict(entries) = body else {
                return Err(Error::Codec {
                    codec: "test",
                    message: "expected a dict body".into(),
                });
            };
            for (key, value) in entries.borrow().iter() {
                if matches!(key, Value::Text(k) if k == "next") {
                    if let Value::Instance { instance, .. } = value {
                        skeleton.with_mut::<LinkNode, ()>(|n| n.next = Some(instance.clone()));
                    }
                }
            }
            Ok(())
        }
    }

    /// Scenario 3: two `LinkNode` instances forming a 2-cycle through
    /// their `next` field.
    #[test]
    fn two_instance_cycle_round_trips_as_two_distinct_instances() {
        let (registry, externalizer) = new_handles();
        registry.borrow_mut().register(Rc::new(LinkNodeRestorator)).unwrap();

        let a = Instance::new(LinkNode { next: None });
        let b = Instance::new(LinkNode { next: Some(a.clone()) });
        a.with_mut::<LinkNode, ()>(|n| n.next = Some(b.clone()));
        let top = Value::Instance {
            type_name: "test.LinkNode".into(),
            instance: a,
        };

        let restored = round_trip(&top, registry, externalizer);
        let Value::Instance { instance: ra, .. } = &restored else {
            panic!("expected an instance");
        };
        let rb = ra.with::<LinkNode, Instance>(|n| n.next.clone().unwrap()).unwrap();
        let ra_again = rb.with::<LinkNode, Instance>(|n| n.next.clone().unwrap()).unwrap();
        assert!(ra.ptr_eq(&ra_again));
        assert!(!ra.ptr_eq(&rb));
    }

    struct Pointish {
        field1: i64,
        field2: i64,
    }

    struct PointishRestorator;

    impl Restorator for PointishRestorator {
        fn type_name(&self) -> &str {
            "test.Pointish"
        }

        fn snapshot(&self, instance: &Instance) -> Result<Value> {
            Ok(instance
                .with::<Pointish, Value>(|p| {
                    let mut fields = Vec::new();
                    if p.field1 != 0 {
                        fields.push((Value::Text("field1".into()), Value::Int(BigInt::from(p.field1))));
                    }
                    if p.field2 != 5 {
                        fields.push((Value::Text("field2".into()), Value::Int(BigInt::from(p.field2))));
                    }
                    Value::dict(fields)
                })
                .unwrap())
        }

        fn prepare(&self) -> Instance {
            Instance::new(Pointish { field1: 0, field2: 5 })
        }

        fn recover(&self, skeleton: &Instance, body: Value) -> Result<()> {
            let Value::Dict(entries) = body else {
                return Err(Error::Codec {
                    codec: "test",
                    message: "expected a dict body".into(),
                });
            };
            for (key, value) in entries.borrow().iter() {
                let Value::Text(name) = key else { continue };
                let Value::Int(n) = value else { continue };
                let n: i64 = num_traits::ToPrimitive::to_i64(n).unwrap();
                skeleton.with_mut::<Pointish, ()>(|p| match name.as_str() {
                    "field1" => p.field1 = n,
                    "field2" => p.field2 = n,
                    _ => {}
                });
            }
            Ok(())
        }
    }

    /// Scenario 4: a field left at its default is omitted from the
    /// snapshot, and recovery repopulates it from `prepare`'s default.
    #[test]
    fn default_valued_field_is_omitted_and_restored() {
        let (registry, externalizer) = new_handles();
        registry.borrow_mut().register(Rc::new(PointishRestorator)).unwrap();

        let top = Value::Instance {
            type_name: "test.Pointish".into(),
            instance: Instance::new(Pointish { field1: 2, field2: 5 }),
        };
        let ser = Serializer::new(registry.clone(), externalizer.clone());
        let node = ser.convert(&top).unwrap();
        let Node::Instance { body, .. } = &node else {
            panic!("expected an instance node");
        };
        match body.as_ref() {
            Node::Dict(pairs) => assert_eq!(pairs.len(), 1),
            other => panic!("expected a dict body, got {other:?}"),
        }

        let restored = round_trip(&top, registry, externalizer);
        let Value::Instance { instance, .. } = &restored else {
            panic!("expected an instance");
        };
        instance.with::<Pointish, ()>(|p| {
            assert_eq!(p.field1, 2);
            assert_eq!(p.field2, 5);
        });
    }

    /// Scenario 5/6: `VersionAdapter::adapt` chains every declared step
    /// strictly between the source and target version, upgrading or
    /// downgrading as needed, treating a missing intermediate step as the
    /// identity.
    #[test]
    fn version_adapter_chains_upgrade_and_downgrade_steps() {
        use crate::version::VersionAdapter;

        let mut adapter = VersionAdapter::new();
        adapter.register_upgrade(
            "test.A",
            2,
            Rc::new(|v: Value| {
                let Value::Dict(entries) = v else { unreachable!() };
                let entries = entries.borrow();
                let foo = entries.iter().find(|(k, _)| matches!(k, Value::Text(s) if s == "foo")).unwrap();
                Ok(Value::dict(vec![(Value::Text("foo".into()), foo.1.clone())]))
            }),
        );
        adapter.register_upgrade(
            "test.A",
            3,
            Rc::new(|v: Value| {
                let Value::Dict(entries) = v else { unreachable!() };
                let entries = entries.borrow();
                let (_, foo) = entries.iter().find(|(k, _)| matches!(k, Value::Text(s) if s == "foo")).unwrap();
                let Value::Text(s) = foo else { unreachable!() };
                Ok(Value::dict(vec![(Value::Text("bar".into()), Value::Int(s.parse().unwrap()))]))
            }),
        );

        let v1 = Value::dict(vec![(Value::Text("foo".into()), Value::Text("18".into()))]);
        let (v3, applied) = adapter.adapt("test.A", v1, 1, 3).unwrap();
        assert_eq!(applied, vec![2, 3]);
        match v3 {
            Value::Dict(entries) => {
                let entries = entries.borrow();
                assert_eq!(entries.len(), 1);
                assert!(matches!(&entries[0], (Value::Text(k), Value::Int(n)) if k == "bar" && *n == BigInt::from(18)));
            }
            _ => panic!("expected a dict"),
        }

        // A missing intermediate step (version 2 for type B) is the
        // identity: only the declared `downgrade_to_1` step fires.
        let mut adapter = VersionAdapter::new();
        adapter.register_downgrade(
            "test.B",
            1,
            Rc::new(|v: Value| Ok(v)),
        );
        let v3 = Value::Int(BigInt::from(42));
        let (v1, applied) = adapter.adapt("test.B", v3, 3, 1).unwrap();
        assert_eq!(applied, vec![1]);
        assert!(matches!(v1, Value::Int(n) if n == BigInt::from(42)));
    }

    /// An instance registered only with the externalizer, never with the
    /// type registry, is emitted as `Node::External` and resolves back to
    /// the same handle on decode — it never touches `Restorator::snapshot`.
    #[test]
    fn externalized_instance_round_trips_via_stable_id() {
        struct Session {
            label: String,
        }

        let (registry, externalizer) = new_handles();
        let session = Instance::new(Session { label: "s1".into() });
        externalizer.borrow_mut().add("test.Session", "s1", session.clone());

        let top = Value::Instance {
            type_name: "test.Session".into(),
            instance: session.clone(),
        };
        let ser = Serializer::new(registry.clone(), externalizer.clone());
        let node = ser.convert(&top).unwrap();
        match &node {
            Node::External { type_name, stable_id } => {
                assert_eq!(type_name, "test.Session");
                assert_eq!(stable_id, "s1");
            }
            other => panic!("expected an External node, got {other:?}"),
        }

        let uns = Unserializer::new(registry, externalizer);
        let restored = uns.convert(&node).unwrap();
        let Value::Instance { instance, .. } = &restored else {
            panic!("expected an instance");
        };
        assert!(instance.ptr_eq(&session));
        instance.with::<Session, ()>(|s| assert_eq!(s.label, "s1"));
    }

    /// `freeze` elides the `Instance` wrapper around a registered type's
    /// body, unlike `convert`; containers are unaffected by the distinction.
    #[test]
    fn freeze_mode_elides_instance_wrapper_but_not_containers() {
        let (registry, externalizer) = new_handles();
        registry.borrow_mut().register(Rc::new(PointishRestorator)).unwrap();

        let top = Value::Instance {
            type_name: "test.Pointish".into(),
            instance: Instance::new(Pointish { field1: 2, field2: 5 }),
        };
        let ser = Serializer::new(registry.clone(), externalizer.clone());

        let converted = ser.convert(&top).unwrap();
        assert!(matches!(converted, Node::Instance { .. }));

        let frozen = ser.freeze(&top).unwrap();
        match &frozen {
            Node::Dict(pairs) => assert_eq!(pairs.len(), 1),
            other => panic!("expected the bare body dict, got {other:?}"),
        }

        let list = Value::list(vec![Value::Int(BigInt::from(7))]);
        assert_eq!(ser.convert(&list).unwrap(), ser.freeze(&list).unwrap());
    }

    /// When the target version differs from a type's native version, the
    /// emitted `Instance` node carries that target as its `version`.
    #[test]
    fn version_tagged_instance_emission_uses_target_version() {
        let (registry, externalizer) = new_handles();
        registry.borrow_mut().register(Rc::new(PointishRestorator)).unwrap();

        let top = Value::Instance {
            type_name: "test.Pointish".into(),
            instance: Instance::new(Pointish { field1: 2, field2: 5 }),
        };
        let ser = Serializer::new(registry, externalizer).with_versions(1, 5);
        let node = ser.convert(&top).unwrap();
        match node {
            Node::Instance { version, .. } => assert_eq!(version, Some(5)),
            other => panic!("expected an instance node, got {other:?}"),
        }
    }

    /// `Options::referenceable_atoms` tracks repeated `Null`/`Bool`/`Int`
    /// atoms the same way containers are tracked: a repeat is wrapped in
    /// `Dereference` rather than re-emitted by value.
    #[test]
    fn referenceable_atoms_option_dedupes_repeated_ints_on_the_wire() {
        let (registry, externalizer) = new_handles();
        let top = Value::list(vec![
            Value::Int(BigInt::from(42)),
            Value::Int(BigInt::from(42)),
            Value::Int(BigInt::from(7)),
        ]);

        let ser = Serializer::new(registry.clone(), externalizer.clone()).with_options(Options {
            referenceable_atoms: true,
            ..Options::default()
        });
        let node = ser.convert(&top).unwrap();
        let Node::List(items) = &node else {
            panic!("expected a list");
        };
        assert!(matches!(items[0], Node::Reference { id: 1, .. }));
        assert!(matches!(items[1], Node::Dereference(1)));
        assert!(matches!(items[2], Node::Int(_)));

        let uns = Unserializer::new(registry, externalizer);
        let restored = uns.convert(&node).unwrap();
        let Value::List(rc) = &restored else {
            panic!("expected a list");
        };
        let restored_items = rc.borrow();
        assert!(matches!(&restored_items[0], Value::Int(n) if *n == BigInt::from(42)));
        assert!(matches!(&restored_items[1], Value::Int(n) if *n == BigInt::from(42)));
        assert!(matches!(&restored_items[2], Value::Int(n) if *n == BigInt::from(7)));
    }

    #[test]
    fn dereference_with_no_matching_reference_is_unknown() {
        let (registry, externalizer) = new_handles();
        let uns = Unserializer::new(registry, externalizer);
        let err = uns.convert(&Node::Dereference(99)).unwrap_err();
        assert!(matches!(err, Error::UnknownReference(99)));
    }

    #[test]
    fn duplicate_reference_id_is_rejected() {
        let (registry, externalizer) = new_handles();
        let uns = Unserializer::new(registry, externalizer);
        let node = Node::List(vec![
            Node::Reference { id: 1, inner: Box::new(Node::Null) },
            Node::Reference { id: 1, inner: Box::new(Node::Null) },
        ]);
        let err = uns.convert(&node).unwrap_err();
        assert!(matches!(err, Error::DuplicateReference(1)));
    }

    proptest::proptest! {
        /// Invariants 1 and 5: round-tripping a list that aliases a small
        /// pool of shared sub-lists preserves both the values reachable
        /// from each position and exactly which positions are aliased —
        /// no more sharing than the input had, and no less.
        #[test]
        fn round_trip_preserves_values_and_topology(
            pool_values in proptest::collection::vec(-100i64..100, 1..4),
            raw_indices in proptest::collection::vec(0usize..16, 1..8),
        ) {
            let (registry, externalizer) = new_handles();
            let pool: Vec<Value> = pool_values
                .iter()
                .map(|&n| Value::list(vec![Value::Int(BigInt::from(n))]))
                .collect();
            let indices: Vec<usize> = raw_indices.into_iter().map(|i| i % pool.len()).collect();
            let top = Value::list(indices.iter().map(|&i| pool[i].clone()).collect());

            let ser = Serializer::new(registry.clone(), externalizer.clone());
            let node = ser.convert(&top).unwrap();
            let uns = Unserializer::new(registry, externalizer);
            let restored = uns.convert(&node).unwrap();

            let Value::List(restored_items) = &restored else {
                panic!("expected a list");
            };
            let restored_items = restored_items.borrow();
            proptest::prop_assert_eq!(restored_items.len(), indices.len());

            for (slot, &pool_idx) in indices.iter().enumerate() {
                let Value::List(inner) = &restored_items[slot] else {
                    panic!("expected a list");
                };
                let Value::Int(n) = &inner.borrow()[0] else {
                    panic!("expected an int");
                };
                proptest::prop_assert_eq!(n, &BigInt::from(pool_values[pool_idx]));
            }

            for i in 0..indices.len() {
                for j in (i + 1)..indices.len() {
                    let Value::List(a) = &restored_items[i] else { panic!("expected a list") };
                    let Value::List(b) = &restored_items[j] else { panic!("expected a list") };
                    proptest::prop_assert_eq!(Rc::ptr_eq(a, b), indices[i] == indices[j]);
                }
            }
        }
    }
}
