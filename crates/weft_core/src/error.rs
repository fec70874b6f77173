use thiserror::Error;

use crate::node::RefId;

/// Every failure mode this crate surfaces.
///
/// The library never retries and never returns a partial result: a
/// `convert`/`freeze`/`adapt` call either returns `Ok` or aborts with one of
/// these.
#[derive(Debug, Error)]
pub enum Error {
    /// A value's concrete type is not a built-in atom, a registered
    /// serializable, an enum member, or a type object.
    #[error("value of type `{type_name}` is not serializable")]
    UnserializableType { type_name: String },

    /// `register` was called with a canonical name that already names a
    /// different restorator.
    #[error("type `{type_name}` is already registered under a different restorator")]
    DuplicateType { type_name: String },

    /// Decoding an `Instance` whose type name has no registered restorator.
    #[error("type `{type_name}` is not registered")]
    UnknownType { type_name: String },

    /// Decoding an `External` whose `(type_name, stable_id)` is absent from
    /// the externalizer.
    #[error("external `{type_name}`/`{stable_id}` is not registered")]
    UnknownExternal { type_name: String, stable_id: String },

    /// A `Dereference` with no matching `Reference` in the tree.
    #[error("dereference of unknown ref id {0}")]
    UnknownReference(RefId),

    /// The same ref id was declared by two `Reference` nodes.
    #[error("ref id {0} declared more than once")]
    DuplicateReference(RefId),

    /// A cycle ran through an immutable or non-referenceable type, which
    /// cannot be fixed up after the fact.
    #[error("cycle through immutable or non-referenceable type `{type_name}`")]
    CyclicImmutable { type_name: String },

    /// A `Formatable` constructor or decoder saw a field name it did not
    /// declare.
    #[error("unknown field `{0}`")]
    UnknownField(String),

    /// A version-adapter step raised while rewriting a snapshot.
    #[error("adapter step to version {version} failed: {source}")]
    AdapterFailure {
        version: u32,
        #[source]
        source: Box<Error>,
    },

    /// Malformed wire input: not valid for the codec's grammar.
    #[error("malformed input for codec `{codec}`: {message}")]
    Codec { codec: &'static str, message: String },

    /// The requested codec or feature was not built into this binary.
    #[error("codec/feature `{0}` is not available in this build")]
    CompatUnavailable(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
