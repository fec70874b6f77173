//! Field-schema helper for types that would rather declare their
//! serializable shape than hand-write `Restorator::snapshot`/`recover`.
//!
//! A field carries a name, a wire key (defaulting to the name), and a
//! default value. `snapshot` omits a field whose current value equals its
//! default and includes it otherwise — including when it has been
//! explicitly set back to something that merely looks like "no value",
//! since the comparison is against the declared default, not against
//! `Value::Null`.

use crate::error::{Error, Result};
use crate::value::Value;

/// One declared field of a [`Formatable`] type.
pub struct FieldSpec {
    pub name: &'static str,
    pub wire_key: &'static str,
    pub default: fn() -> Value,
}

/// Implemented by types that declare their fields via [`formatable_fields!`]
/// rather than writing `snapshot`/`recover` by hand.
///
/// A type's [`FieldSpec`] list should include every field declared on its
/// ancestors plus its own; `formatable_fields!` does not itself model
/// inheritance; callers lay that out in the `specs` list they pass in.
pub trait Formatable {
    fn field_specs() -> &'static [FieldSpec]
    where
        Self: Sized;

    /// Current value of a declared field. `name` is always one `field_specs`
    /// named; implementations may panic on anything else.
    fn get_field(&self, name: &str) -> Value;

    /// Sets a declared field, or routes to a property-style setter. Returns
    /// `UnknownField` for anything `field_specs` didn't declare and that
    /// the implementation doesn't otherwise accept.
    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;

    fn snapshot(&self) -> Result<Value>
    where
        Self: Sized,
    {
        let mut out = Vec::new();
        for spec in Self::field_specs() {
            let current = self.get_field(spec.name);
            if !value_eq(&current, &(spec.default)()) {
                out.push((Value::Text(spec.wire_key.to_string()), current));
            }
        }
        Ok(Value::dict(out))
    }

    fn recover(&mut self, body: Value) -> Result<()>
    where
        Self: Sized,
    {
        let Value::Dict(entries) = body else {
            return Err(Error::Codec {
                codec: "formatable",
                message: "expected a dict body".to_string(),
            });
        };
        for (key, value) in entries.borrow().iter() {
            let Value::Text(wire_key) = key else {
                return Err(Error::Codec {
                    codec: "formatable",
                    message: "field keys must be text".to_string(),
                });
            };
            let spec = Self::field_specs()
                .iter()
                .find(|s| s.wire_key == wire_key.as_str())
                .ok_or_else(|| Error::UnknownField(wire_key.clone()))?;
            self.set_field(spec.name, value.clone())?;
        }
        Ok(())
    }
}

/// Structural equality over [`Value`] for the narrow purpose of deciding
/// whether a field still holds its default. Containers compare by
/// structure, not identity — two freshly-built empty lists are equal here
/// even though the flattener would never alias them.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Text(x), Value::Text(y)) => x == y,
        (Value::TypeRef(x), Value::TypeRef(y)) => x == y,
        (Value::EnumRef(x), Value::EnumRef(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::List(x), Value::List(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::Set(x), Value::Set(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((ak, av), (bk, bv))| value_eq(ak, bk) && value_eq(av, bv))
        }
        _ => false,
    }
}

/// Declares a static [`FieldSpec`] slice for a [`Formatable`] impl.
///
/// ```ignore
/// formatable_fields! {
///     FIELDS = [
///         field1: "field1" => Value::Null,
///         field2: "custom_serializable" => || Value::Int(5.into()),
///     ]
/// }
/// ```
#[macro_export]
macro_rules! formatable_fields {
    ($vis:vis $name:ident = [ $( $field:ident : $wire_key:literal => $default:expr ),* $(,)? ]) => {
        $vis static $name: &[$crate::formatable::FieldSpec] = &[
            $(
                $crate::formatable::FieldSpec {
                    name: stringify!($field),
                    wire_key: $wire_key,
                    default: || $default,
                },
            )*
        ];
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget {
        count: i64,
        label: String,
    }

    formatable_fields! {
        WIDGET_FIELDS = [
            count: "count" => Value::Int(0.into()),
            label: "name" => Value::Text("untitled".into()),
        ]
    }

    impl Formatable for Widget {
        fn field_specs() -> &'static [FieldSpec] {
            WIDGET_FIELDS
        }

        fn get_field(&self, name: &str) -> Value {
            match name {
                "count" => Value::Int(self.count.into()),
                "label" => Value::Text(self.label.clone()),
                other => panic!("unexpected field {other}"),
            }
        }

        fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
            match (name, value) {
                ("count", Value::Int(n)) => {
                    self.count = num_traits::ToPrimitive::to_i64(&n).unwrap();
                    Ok(())
                }
                ("label", Value::Text(s)) => {
                    self.label = s;
                    Ok(())
                }
                (other, _) => Err(Error::UnknownField(other.to_string())),
            }
        }
    }

    #[test]
    fn snapshot_omits_fields_still_at_their_default() {
        let w = Widget { count: 0, label: "untitled".to_string() };
        let snapshot = w.snapshot().unwrap();
        match snapshot {
            Value::Dict(entries) => assert_eq!(entries.borrow().len(), 0),
            _ => panic!("expected a dict"),
        }

        let w = Widget { count: 3, label: "untitled".to_string() };
        let snapshot = w.snapshot().unwrap();
        match snapshot {
            Value::Dict(entries) => {
                let entries = entries.borrow();
                assert_eq!(entries.len(), 1);
                assert!(matches!(&entries[0].0, Value::Text(k) if k == "count"));
            }
            _ => panic!("expected a dict"),
        }
    }

    #[test]
    fn recover_repopulates_only_the_fields_present_on_the_wire() {
        let mut w = Widget { count: 0, label: "untitled".to_string() };
        let body = Value::dict(vec![(Value::Text("name".into()), Value::Text("gadget".into()))]);
        w.recover(body).unwrap();
        assert_eq!(w.count, 0);
        assert_eq!(w.label, "gadget");
    }

    #[test]
    fn recover_rejects_an_unknown_wire_key() {
        let mut w = Widget { count: 0, label: "untitled".to_string() };
        let body = Value::dict(vec![(Value::Text("bogus".into()), Value::Null)]);
        let err = w.recover(body).unwrap_err();
        assert!(matches!(err, Error::UnknownField(k) if k == "bogus"));
    }
}
