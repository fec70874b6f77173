//! The type registry: a process-wide or per-instance mapping from a
//! canonical type name to the [`Restorator`] that knows how to snapshot,
//! prepare, recover, and post-process instances of that type.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::{Instance, Value};

/// The capability bundle a user-defined aggregate type provides so the
/// core never needs to know its concrete Rust shape.
///
/// # Two-phase construction
///
/// `prepare` allocates a bare skeleton *before* its contents are known, and
/// `recover` populates it afterward. This split is what lets the
/// unflattener register a skeleton under a `Reference` id and then decode
/// fields that point back at it — it must be preserved even though a
/// single-step constructor would otherwise be the natural Rust shape.
pub trait Restorator {
    /// The canonical name this type is registered and serialized under.
    fn type_name(&self) -> &str;

    /// Produces the serializable body of `instance`. The returned `Value`
    /// is recursively flattened by the caller, so nested shared/cyclic
    /// structure inside the body is still tracked.
    fn snapshot(&self, instance: &Instance) -> Result<Value>;

    /// Allocates a bare, uninitialized instance suitable for insertion into
    /// the unflattener's reference table before its contents are known.
    fn prepare(&self) -> Instance;

    /// Populates `skeleton` from the already-decoded `body`. `body` may
    /// itself contain handles to other still-being-recovered skeletons.
    fn recover(&self, skeleton: &Instance, body: Value) -> Result<()>;

    /// Optional post-pass, invoked once per instance after every instance
    /// in the current decode has been `recover`-ed. Default: no-op.
    fn restored(&self, _instance: &Instance) -> Result<()> {
        Ok(())
    }

    /// If `false`, instances of this type are never wrapped in a
    /// `Reference` on encode and are re-materialized as distinct copies
    /// (never shared) on decode.
    fn referenceable(&self) -> bool {
        true
    }

    /// If `true`, `prepare`/`recover` may be fused into one construction
    /// step by the caller, and this type must never appear in a cycle —
    /// the flattener fails with `CyclicImmutable` if it does.
    fn immutable(&self) -> bool {
        false
    }

    /// This type's current schema version. Used by the flattener to decide
    /// whether a target-version snapshot needs adapting before it is
    /// emitted.
    fn native_version(&self) -> u32 {
        1
    }
}

/// A registry of restorators, keyed by canonical type name.
///
/// Mutations (`register`) require `&mut self`; lookups only need `&self`,
/// matching the read-mostly access pattern `spec.md` §5 describes — many
/// concurrent readers, exclusive access to register.
#[derive(Default)]
pub struct Registry {
    by_name: HashMap<String, Rc<dyn Restorator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `restorator` under its canonical name.
    ///
    /// Re-registering the exact same restorator (by `Rc` identity) is a
    /// no-op. Registering a different restorator under a name that is
    /// already taken fails with [`Error::DuplicateType`].
    pub fn register(&mut self, restorator: Rc<dyn Restorator>) -> Result<()> {
        let name = restorator.type_name().to_string();
        match self.by_name.get(&name) {
            Some(existing) if Rc::ptr_eq(existing, &restorator) => {
                tracing::trace!(type_name = %name, "register: already registered, no-op");
                Ok(())
            }
            Some(_) => Err(Error::DuplicateType { type_name: name }),
            None => {
                tracing::debug!(type_name = %name, "register");
                self.by_name.insert(name, restorator);
                Ok(())
            }
        }
    }

    /// Looks up the restorator for `type_name`.
    pub fn lookup(&self, type_name: &str) -> Result<Rc<dyn Restorator>> {
        self.by_name.get(type_name).cloned().ok_or_else(|| {
            tracing::trace!(type_name, "lookup: unknown type");
            Error::UnknownType {
                type_name: type_name.to_string(),
            }
        })
    }

    /// Whether a restorator is registered under `type_name`.
    pub fn contains(&self, type_name: &str) -> bool {
        self.by_name.contains_key(type_name)
    }
}
