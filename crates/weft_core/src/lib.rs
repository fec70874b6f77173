//! The serialization core: intermediate tree, type registry, externalizer,
//! flattener/unflattener, and version adapter. Wire codecs live in sibling
//! crates and are thin leaves over [`Node`].

pub mod error;
pub mod externalizer;
pub mod flatten;
pub mod formatable;
pub mod global;
pub mod node;
pub mod options;
pub mod registry;
pub mod unflatten;
pub mod value;
pub mod version;

pub use error::{Error, Result};
pub use externalizer::Externalizer;
pub use flatten::{Mode, Serializer};
pub use formatable::Formatable;
pub use global::{default_externalizer, default_registry, register, ExternalizerHandle, RegistryHandle};
pub use node::{Node, RefId};
pub use options::Options;
pub use registry::{Registry, Restorator};
pub use unflatten::Unserializer;
pub use value::{Instance, Value};
pub use version::VersionAdapter;
