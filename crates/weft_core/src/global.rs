//! Process-default registry and externalizer.
//!
//! A [`crate::Restorator`] is `!Send`/`!Sync` by construction (it closes
//! over `Rc`-based [`crate::Instance`] handles), so the default singletons
//! cannot be a plain `Arc<RwLock<_>>` static the way a thread-safe registry
//! would be. Each thread gets its own registry/externalizer instead, via
//! `thread_local!` — consistent with `spec.md` §5's "one serializer or
//! unserializer instance is not safe to share across threads".

use std::cell::RefCell;
use std::rc::Rc;

use crate::externalizer::Externalizer;
use crate::registry::{Registry, Restorator};

pub type RegistryHandle = Rc<RefCell<Registry>>;
pub type ExternalizerHandle = Rc<RefCell<Externalizer>>;

thread_local! {
    static REGISTRY: RegistryHandle = Rc::new(RefCell::new(Registry::new()));
    static EXTERNALIZER: ExternalizerHandle = Rc::new(RefCell::new(Externalizer::new()));
}

/// This thread's default registry, shared by every `Serializer`/
/// `Unserializer` constructed with [`default_registry`] unless overridden.
pub fn default_registry() -> RegistryHandle {
    REGISTRY.with(|r| r.clone())
}

/// This thread's default externalizer.
pub fn default_externalizer() -> ExternalizerHandle {
    EXTERNALIZER.with(|e| e.clone())
}

/// Registers `restorator` into this thread's default registry.
pub fn register(restorator: Rc<dyn Restorator>) -> crate::error::Result<()> {
    default_registry().borrow_mut().register(restorator)
}
