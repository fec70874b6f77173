#![doc = include_str!("../README.md")]

pub use weft_core as core;

#[cfg(feature = "json")]
pub use weft_json as json;

#[cfg(feature = "sexp")]
pub use weft_sexp as sexp;

#[cfg(feature = "pack")]
pub use weft_pack as pack;

pub use weft_core::{
    Externalizer, Instance, Node, Registry, Restorator, Serializer, Unserializer, VersionAdapter,
};
