/// Construction-time knobs shared by [`crate::Serializer`] and
/// [`crate::Unserializer`].
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Emit `Dict` entries in a canonical (sorted-by-key) order rather
    /// than the source's iteration order.
    ///
    /// Default `false`: the source's behavior here was left
    /// implementation-defined, so this port picks a deterministic default
    /// — insertion order preserved — rather than inheriting ambiguity.
    pub sort_keys: bool,

    /// Track and reference small atoms (booleans, small ints, `Null`)
    /// the same as containers, instead of always emitting them by value.
    pub referenceable_atoms: bool,

    /// When `true` (the default), decoding an `Instance` whose type name
    /// has no registered restorator fails with `UnknownType`. When
    /// `false`, it decodes to a generic record holding the name and body
    /// instead of failing.
    pub strict_unknown: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            sort_keys: false,
            referenceable_atoms: false,
            strict_unknown: true,
        }
    }
}
