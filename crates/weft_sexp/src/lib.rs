//! S-expression-style wire codec: a hand-rolled tagged-list grammar.
//! There is no ecosystem crate for this bespoke format, so both the
//! lexer/parser ([`sexpr`]) and the `Node` mapping below are hand-written.
//!
//! | node kind | wire shape |
//! |---|---|
//! | `Bytes` | `["bytes", "<hex>"]` |
//! | `Text` (ASCII) | `"text"` |
//! | `Text` (non-ASCII) | `["unicode", "text"]` |
//! | `Tuple` | `["tuple", ...]` |
//! | `List` | `["list", ...]` |
//! | `Set` | `["set", ...]` |
//! | `Dict` | `["dict", [k, v], ...]` |
//! | `TypeRef` | `["type", "name"]` |
//! | `EnumRef` | `["enum", "name"]` |
//! | `External` | `["external", "type_name", "stable_id"]` |
//! | `Instance` | `["instance", "type_name", body, version_or_null]` |
//! | `Reference` | `["reference", id, inner]` |
//! | `Dereference` | `["dereference", id]` |

mod sexpr;

use std::str::FromStr;

use num_bigint::BigInt;

use sexpr::SExpr;
use weft_core::error::{Error, Result};
use weft_core::node::{Node, RefId};

const CODEC: &str = "sexp";

fn codec_err(message: impl Into<String>) -> Error {
    Error::Codec {
        codec: CODEC,
        message: message.into(),
    }
}

pub fn emit(node: &Node) -> SExpr {
    match node {
        Node::Null => SExpr::Null,
        Node::Bool(b) => SExpr::Bool(*b),
        Node::Int(i) => SExpr::Int(i.to_string()),
        Node::Float(f) => SExpr::Float(*f),
        Node::Bytes(b) => tagged("bytes", vec![SExpr::Str(hex_encode(b))]),
        Node::Text(s) if s.is_ascii() => SExpr::Str(s.clone()),
        Node::Text(s) => tagged("unicode", vec![SExpr::Str(s.clone())]),
        Node::Tuple(items) => tagged("tuple", items.iter().map(emit).collect()),
        Node::List(items) => tagged("list", items.iter().map(emit).collect()),
        Node::Set(items) => tagged("set", items.iter().map(emit).collect()),
        Node::Dict(pairs) => {
            let mut out = vec![SExpr::Str("dict".to_string())];
            for (k, v) in pairs {
                out.push(SExpr::List(vec![emit(k), emit(v)]));
            }
            SExpr::List(out)
        }
        Node::TypeRef(name) => tagged("type", vec![SExpr::Str(name.clone())]),
        Node::EnumRef(name) => tagged("enum", vec![SExpr::Str(name.clone())]),
        Node::External { type_name, stable_id } => tagged(
            "external",
            vec![SExpr::Str(type_name.clone()), SExpr::Str(stable_id.clone())],
        ),
        Node::Instance { type_name, body, version } => tagged(
            "instance",
            vec![
                SExpr::Str(type_name.clone()),
                emit(body),
                version.map(|v| SExpr::Int(v.to_string())).unwrap_or(SExpr::Null),
            ],
        ),
        Node::Reference { id, inner } => tagged("reference", vec![SExpr::Int(id.to_string()), emit(inner)]),
        Node::Dereference(id) => tagged("dereference", vec![SExpr::Int(id.to_string())]),
    }
}

fn tagged(tag: &str, mut rest: Vec<SExpr>) -> SExpr {
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(SExpr::Str(tag.to_string()));
    items.append(&mut rest);
    SExpr::List(items)
}

pub fn parse(expr: &SExpr) -> Result<Node> {
    match expr {
        SExpr::Null => Ok(Node::Null),
        SExpr::Bool(b) => Ok(Node::Bool(*b)),
        SExpr::Int(digits) => {
            BigInt::from_str(digits).map(Node::Int).map_err(|e| codec_err(e.to_string()))
        }
        SExpr::Float(f) => Ok(Node::Float(*f)),
        SExpr::Str(s) => Ok(Node::Text(s.clone())),
        SExpr::List(items) => parse_list(items),
    }
}

fn parse_list(items: &[SExpr]) -> Result<Node> {
    let Some(SExpr::Str(tag)) = items.first() else {
        return Err(codec_err("list must open with a string tag"));
    };
    let rest = &items[1..];
    match tag.as_str() {
        "bytes" => {
            let [SExpr::Str(hex)] = rest else {
                return Err(codec_err("bytes expects one string argument"));
            };
            Ok(Node::Bytes(hex_decode(hex)?))
        }
        "unicode" => {
            let [SExpr::Str(s)] = rest else {
                return Err(codec_err("unicode expects one string argument"));
            };
            Ok(Node::Text(s.clone()))
        }
        "tuple" => Ok(Node::Tuple(rest.iter().map(parse).collect::<Result<_>>()?)),
        "list" => Ok(Node::List(rest.iter().map(parse).collect::<Result<_>>()?)),
        "set" => Ok(Node::Set(rest.iter().map(parse).collect::<Result<_>>()?)),
        "dict" => {
            let mut pairs = Vec::with_capacity(rest.len());
            for entry in rest {
                let SExpr::List(kv) = entry else {
                    return Err(codec_err("dict entries must be [key, value] pairs"));
                };
                let [k, v] = kv.as_slice() else {
                    return Err(codec_err("dict entries must be [key, value] pairs"));
                };
                pairs.push((parse(k)?, parse(v)?));
            }
            Ok(Node::Dict(pairs))
        }
        "type" => {
            let [SExpr::Str(name)] = rest else {
                return Err(codec_err("type expects one string argument"));
            };
            Ok(Node::TypeRef(name.clone()))
        }
        "enum" => {
            let [SExpr::Str(name)] = rest else {
                return Err(codec_err("enum expects one string argument"));
            };
            Ok(Node::EnumRef(name.clone()))
        }
        "external" => {
            let [SExpr::Str(type_name), SExpr::Str(stable_id)] = rest else {
                return Err(codec_err("external expects two string arguments"));
            };
            Ok(Node::External {
                type_name: type_name.clone(),
                stable_id: stable_id.clone(),
            })
        }
        "instance" => {
            let [SExpr::Str(type_name), body, version] = rest else {
                return Err(codec_err("instance expects type name, body, version"));
            };
            let version = match version {
                SExpr::Null => None,
                SExpr::Int(digits) => {
                    Some(digits.parse::<u32>().map_err(|e| codec_err(e.to_string()))?)
                }
                _ => return Err(codec_err("version must be an integer or null")),
            };
            Ok(Node::Instance {
                type_name: type_name.clone(),
                body: Box::new(parse(body)?),
                version,
            })
        }
        "reference" => {
            let [id, inner] = rest else {
                return Err(codec_err("reference expects id and inner node"));
            };
            Ok(Node::Reference {
                id: parse_ref_id(id)?,
                inner: Box::new(parse(inner)?),
            })
        }
        "dereference" => {
            let [id] = rest else {
                return Err(codec_err("dereference expects one id argument"));
            };
            Ok(Node::Dereference(parse_ref_id(id)?))
        }
        other => Err(codec_err(format!("unknown tag `{other}`"))),
    }
}

fn parse_ref_id(expr: &SExpr) -> Result<RefId> {
    let SExpr::Int(digits) = expr else {
        return Err(codec_err("ref id must be an integer"));
    };
    digits.parse::<RefId>().map_err(|e| codec_err(e.to_string()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(codec_err("odd-length hex string"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| codec_err(e.to_string())))
        .collect()
}

/// Serializes `node` to its tagged-list text form.
pub fn to_string(node: &Node) -> String {
    let mut out = String::new();
    sexpr::write(&emit(node), &mut out);
    out
}

/// Parses a tagged-list text form into a `Node`.
pub fn from_str(text: &str) -> Result<Node> {
    parse(&sexpr::parse(text)?)
}
