//! CBOR binary wire codec: converts [`weft_core::Node`] to and from
//! `ciborium::value::Value`, and uses `ciborium` for the actual byte
//! packing — this crate never hand-rolls binary framing.
//!
//! `List` and `Dict` map onto CBOR's native array and map major types.
//! Everything CBOR has no native shape for rides a CBOR tag wrapping a
//! one- or two-element array, in the tag range reserved for
//! application-private use (RFC 8949 §9, tags ≥ 256 not otherwise
//! assigned):
//!
//! | node kind | wire shape |
//! |---|---|
//! | big `Int` (doesn't fit `i128`) | tag 2/3 (standard positive/negative bignum) + byte string |
//! | `Tuple` | tag `60001` around an array |
//! | `Set` | tag `60002` around an array |
//! | `TypeRef` | tag `60003` around `[name]` |
//! | `EnumRef` | tag `60004` around `[name]` |
//! | `External` | tag `60005` around `[type_name, stable_id]` |
//! | `Instance` | tag `60006` around `[type_name, body, version_or_null]` |
//! | `Reference` | tag `60007` around `[id, inner]` |
//! | `Dereference` | tag `60008` around `[id]` |

use ciborium::value::{Integer, Value as Cbor};
use num_bigint::{BigInt, Sign};
use num_traits::cast::ToPrimitive;

use weft_core::error::{Error, Result};
use weft_core::node::{Node, RefId};

const CODEC: &str = "pack";

const TAG_BIGNUM_POS: u64 = 2;
const TAG_BIGNUM_NEG: u64 = 3;
const TAG_TUPLE: u64 = 60_001;
const TAG_SET: u64 = 60_002;
const TAG_TYPE: u64 = 60_003;
const TAG_ENUM: u64 = 60_004;
const TAG_EXTERNAL: u64 = 60_005;
const TAG_INSTANCE: u64 = 60_006;
const TAG_REFERENCE: u64 = 60_007;
const TAG_DEREFERENCE: u64 = 60_008;

fn codec_err(message: impl Into<String>) -> Error {
    Error::Codec {
        codec: CODEC,
        message: message.into(),
    }
}

pub fn emit(node: &Node) -> Result<Cbor> {
    let cbor = match node {
        Node::Null => Cbor::Null,
        Node::Bool(b) => Cbor::Bool(*b),
        Node::Float(f) => Cbor::Float(*f),
        Node::Text(s) => Cbor::Text(s.clone()),
        Node::Bytes(b) => Cbor::Bytes(b.clone()),
        Node::Int(i) => emit_int(i),
        Node::Tuple(items) => tagged(TAG_TUPLE, Cbor::Array(emit_all(items)?)),
        Node::List(items) => Cbor::Array(emit_all(items)?),
        Node::Set(items) => tagged(TAG_SET, Cbor::Array(emit_all(items)?)),
        Node::Dict(pairs) => {
            let mut entries = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                entries.push((emit(k)?, emit(v)?));
            }
            Cbor::Map(entries)
        }
        Node::TypeRef(name) => tagged(TAG_TYPE, Cbor::Array(vec![Cbor::Text(name.clone())])),
        Node::EnumRef(name) => tagged(TAG_ENUM, Cbor::Array(vec![Cbor::Text(name.clone())])),
        Node::External { type_name, stable_id } => tagged(
            TAG_EXTERNAL,
            Cbor::Array(vec![Cbor::Text(type_name.clone()), Cbor::Text(stable_id.clone())]),
        ),
        Node::Instance { type_name, body, version } => tagged(
            TAG_INSTANCE,
            Cbor::Array(vec![
                Cbor::Text(type_name.clone()),
                emit(body)?,
                version.map(|v| Cbor::Integer(v.into())).unwrap_or(Cbor::Null),
            ]),
        ),
        Node::Reference { id, inner } => tagged(
            TAG_REFERENCE,
            Cbor::Array(vec![Cbor::Integer((*id).into()), emit(inner)?]),
        ),
        Node::Dereference(id) => tagged(TAG_DEREFERENCE, Cbor::Array(vec![Cbor::Integer((*id).into())])),
    };
    Ok(cbor)
}

fn emit_int(i: &BigInt) -> Cbor {
    if let Some(small) = i.to_i128() {
        if let Ok(int) = Integer::try_from(small) {
            return Cbor::Integer(int);
        }
    }
    if i.sign() == Sign::Minus {
        // CBOR negative bignums are offset by one (RFC 8949 §3.4.3): tag 3
        // wraps the unsigned integer `n` where the represented value is
        // `-1 - n`, i.e. `n = |i| - 1`, not the bare magnitude.
        let n = -i - BigInt::from(1);
        let (_, bytes) = n.to_bytes_be();
        tagged(TAG_BIGNUM_NEG, Cbor::Bytes(bytes))
    } else {
        let (_, bytes) = i.to_bytes_be();
        tagged(TAG_BIGNUM_POS, Cbor::Bytes(bytes))
    }
}

fn emit_all(items: &[Node]) -> Result<Vec<Cbor>> {
    items.iter().map(emit).collect()
}

fn tagged(tag: u64, inner: Cbor) -> Cbor {
    Cbor::Tag(tag, Box::new(inner))
}

pub fn parse(cbor: &Cbor) -> Result<Node> {
    match cbor {
        Cbor::Null => Ok(Node::Null),
        Cbor::Bool(b) => Ok(Node::Bool(*b)),
        Cbor::Float(f) => Ok(Node::Float(*f)),
        Cbor::Text(s) => Ok(Node::Text(s.clone())),
        Cbor::Bytes(b) => Ok(Node::Bytes(b.clone())),
        Cbor::Integer(i) => Ok(Node::Int(BigInt::from(i128::from(*i)))),
        Cbor::Array(items) => Ok(Node::List(items.iter().map(parse).collect::<Result<_>>()?)),
        Cbor::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                pairs.push((parse(k)?, parse(v)?));
            }
            Ok(Node::Dict(pairs))
        }
        Cbor::Tag(tag, inner) => parse_tag(*tag, inner),
        other => Err(codec_err(format!("unsupported CBOR major type: {other:?}"))),
    }
}

fn parse_tag(tag: u64, inner: &Cbor) -> Result<Node> {
    match tag {
        TAG_BIGNUM_POS | TAG_BIGNUM_NEG => {
            let Cbor::Bytes(bytes) = inner else {
                return Err(codec_err("bignum tag requires a byte string"));
            };
            let magnitude = BigInt::from_bytes_be(Sign::Plus, bytes);
            Ok(Node::Int(if tag == TAG_BIGNUM_NEG {
                -(magnitude + BigInt::from(1))
            } else {
                magnitude
            }))
        }
        TAG_TUPLE => {
            let Cbor::Array(items) = inner else {
                return Err(codec_err("tuple tag requires an array"));
            };
            Ok(Node::Tuple(items.iter().map(parse).collect::<Result<_>>()?))
        }
        TAG_SET => {
            let Cbor::Array(items) = inner else {
                return Err(codec_err("set tag requires an array"));
            };
            Ok(Node::Set(items.iter().map(parse).collect::<Result<_>>()?))
        }
        TAG_TYPE => Ok(Node::TypeRef(expect_one_text(inner, "type")?)),
        TAG_ENUM => Ok(Node::EnumRef(expect_one_text(inner, "enum")?)),
        TAG_EXTERNAL => {
            let Cbor::Array(items) = inner else {
                return Err(codec_err("external tag requires an array"));
            };
            let [Cbor::Text(type_name), Cbor::Text(stable_id)] = items.as_slice() else {
                return Err(codec_err("external tag expects two text elements"));
            };
            Ok(Node::External {
                type_name: type_name.clone(),
                stable_id: stable_id.clone(),
            })
        }
        TAG_INSTANCE => {
            let Cbor::Array(items) = inner else {
                return Err(codec_err("instance tag requires an array"));
            };
            let [Cbor::Text(type_name), body, version] = items.as_slice() else {
                return Err(codec_err("instance tag expects type name, body, version"));
            };
            let version = match version {
                Cbor::Null => None,
                Cbor::Integer(i) => {
                    Some(u32::try_from(i128::from(*i)).map_err(|e| codec_err(e.to_string()))?)
                }
                _ => return Err(codec_err("version must be an integer or null")),
            };
            Ok(Node::Instance {
                type_name: type_name.clone(),
                body: Box::new(parse(body)?),
                version,
            })
        }
        TAG_REFERENCE => {
            let Cbor::Array(items) = inner else {
                return Err(codec_err("reference tag requires an array"));
            };
            let [id, inner_node] = items.as_slice() else {
                return Err(codec_err("reference tag expects id and inner node"));
            };
            Ok(Node::Reference {
                id: parse_ref_id(id)?,
                inner: Box::new(parse(inner_node)?),
            })
        }
        TAG_DEREFERENCE => {
            let Cbor::Array(items) = inner else {
                return Err(codec_err("dereference tag requires an array"));
            };
            let [id] = items.as_slice() else {
                return Err(codec_err("dereference tag expects one id element"));
            };
            Ok(Node::Dereference(parse_ref_id(id)?))
        }
        other => Err(codec_err(format!("unknown CBOR tag {other}"))),
    }
}

fn expect_one_text(inner: &Cbor, what: &str) -> Result<String> {
    let Cbor::Array(items) = inner else {
        return Err(codec_err(format!("{what} tag requires an array")));
    };
    let [Cbor::Text(name)] = items.as_slice() else {
        return Err(codec_err(format!("{what} tag expects one text element")));
    };
    Ok(name.clone())
}

fn parse_ref_id(cbor: &Cbor) -> Result<RefId> {
    let Cbor::Integer(i) = cbor else {
        return Err(codec_err("ref id must be an integer"));
    };
    u64::try_from(i128::from(*i)).map_err(|e| codec_err(e.to_string()))
}

/// Packs `node` into CBOR bytes.
pub fn to_bytes(node: &Node) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(&emit(node)?, &mut buf).map_err(|e| codec_err(e.to_string()))?;
    Ok(buf)
}

/// Unpacks CBOR bytes into a `Node`.
pub fn from_bytes(bytes: &[u8]) -> Result<Node> {
    let cbor: Cbor = ciborium::from_reader(bytes).map_err(|e| codec_err(e.to_string()))?;
    parse(&cbor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_a_cyclic_instance_pair() {
        let node = Node::Reference {
            id: 1,
            inner: Box::new(Node::Instance {
                type_name: "example.Node".into(),
                body: Box::new(Node::Dict(vec![(Node::Text("next".into()), Node::Dereference(1))])),
                version: None,
            }),
        };
        let bytes = to_bytes(&node).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), node);
    }

    #[test]
    fn bignum_beyond_i128_round_trips() {
        // i128::MAX is ~1.7e38; this magnitude is ~4.6e57, well past it, so
        // the bignum-tag branch (not the plain-Integer fast path) is exercised.
        let huge = BigInt::from_str("-4567890123456789012345678901234567890123456789012345678")
            .unwrap();
        let node = Node::Int(huge);
        let bytes = to_bytes(&node).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), node);
    }

    #[test]
    fn bignum_positive_beyond_i128_round_trips() {
        let huge = BigInt::from_str("4567890123456789012345678901234567890123456789012345678")
            .unwrap();
        let node = Node::Int(huge);
        let bytes = to_bytes(&node).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), node);
    }

    #[test]
    fn native_map_round_trips_non_text_keys() {
        let node = Node::Dict(vec![(Node::Int(BigInt::from(7)), Node::Bool(false))]);
        let bytes = to_bytes(&node).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), node);
    }
}
