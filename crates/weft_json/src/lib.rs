//! JSON wire codec: converts [`weft_core::Node`] to and from
//! `serde_json::Value`, and packs/unpacks the resulting value with
//! `serde_json` — this crate never hand-rolls byte-level JSON packing.
//!
//! Atoms that JSON has no native shape for are carried as tagged arrays,
//! the same convention the intermediate tree already uses for
//! `Reference`/`Dereference`:
//!
//! | node kind | wire shape |
//! |---|---|
//! | `Bytes` | `[".bytes", "<base64>"]` |
//! | `Tuple` | `[".tuple", [...]]` |
//! | `Set` | `[".set", [...]]` |
//! | `TypeRef` | `[".type", "name"]` |
//! | `EnumRef` | `[".enum", "name"]` |
//! | `External` | `[".ext", "type_name", "stable_id"]` |
//! | `Instance` | `[".inst", "type_name", body, version_or_null]` |
//! | `Reference` | `[".ref", id, inner]` |
//! | `Dereference` | `[".deref", id]` |
//! | big `Int` (doesn't fit `i64`) | `[".bigint", "decimal"]` |
//!
//! `List` and `Dict` use native JSON arrays/objects directly; a `Dict`
//! whose keys are all `Text` is emitted as a JSON object, otherwise as
//! `[".dict", [[k, v], ...]]`.

use std::str::FromStr;

use base64::Engine;
use num_bigint::BigInt;
use serde_json::{Map, Value as Json};

use weft_core::error::{Error, Result};
use weft_core::node::{Node, RefId};

const CODEC: &str = "json";

fn codec_err(message: impl Into<String>) -> Error {
    Error::Codec {
        codec: CODEC,
        message: message.into(),
    }
}

pub fn emit(node: &Node) -> Result<Json> {
    let json = match node {
        Node::Null => Json::Null,
        Node::Bool(b) => Json::Bool(*b),
        Node::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| codec_err("non-finite float has no JSON representation"))?,
        Node::Int(i) => match i64::try_from(i.clone()) {
            Ok(small) => Json::Number(small.into()),
            Err(_) => tagged(".bigint", vec![Json::String(i.to_string())]),
        },
        Node::Bytes(b) => tagged(
            ".bytes",
            vec![Json::String(base64::engine::general_purpose::STANDARD.encode(b))],
        ),
        Node::Text(s) => Json::String(s.clone()),
        Node::Tuple(items) => tagged(".tuple", vec![emit_array(items)?]),
        Node::List(items) => emit_array(items)?,
        Node::Set(items) => tagged(".set", vec![emit_array(items)?]),
        Node::Dict(pairs) => emit_dict(pairs)?,
        Node::TypeRef(name) => tagged(".type", vec![Json::String(name.clone())]),
        Node::EnumRef(name) => tagged(".enum", vec![Json::String(name.clone())]),
        Node::External { type_name, stable_id } => tagged(
            ".ext",
            vec![Json::String(type_name.clone()), Json::String(stable_id.clone())],
        ),
        Node::Instance { type_name, body, version } => tagged(
            ".inst",
            vec![
                Json::String(type_name.clone()),
                emit(body)?,
                version.map(|v| Json::Number(v.into())).unwrap_or(Json::Null),
            ],
        ),
        Node::Reference { id, inner } => tagged(".ref", vec![Json::Number((*id).into()), emit(inner)?]),
        Node::Dereference(id) => tagged(".deref", vec![Json::Number((*id).into())]),
    };
    Ok(json)
}

pub fn parse(json: &Json) -> Result<Node> {
    match json {
        Json::Null => Ok(Node::Null),
        Json::Bool(b) => Ok(Node::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Node::Int(BigInt::from(i)))
            } else if let Some(f) = n.as_f64() {
                Ok(Node::Float(f))
            } else {
                Err(codec_err(format!("unrepresentable number: {n}")))
            }
        }
        Json::String(s) => Ok(Node::Text(s.clone())),
        Json::Array(items) => parse_tagged_or_plain(items),
        Json::Object(map) => parse_object_dict(map),
    }
}

fn emit_array(items: &[Node]) -> Result<Json> {
    Ok(Json::Array(items.iter().map(emit).collect::<Result<_>>()?))
}

fn emit_dict(pairs: &[(Node, Node)]) -> Result<Json> {
    if pairs.iter().all(|(k, _)| matches!(k, Node::Text(_))) {
        let mut map = Map::with_capacity(pairs.len());
        for (k, v) in pairs {
            let Node::Text(key) = k else { unreachable!() };
            map.insert(key.clone(), emit(v)?);
        }
        Ok(Json::Object(map))
    } else {
        let entries = pairs
            .iter()
            .map(|(k, v)| Ok(Json::Array(vec![emit(k)?, emit(v)?])))
            .collect::<Result<_>>()?;
        Ok(tagged(".dict", vec![Json::Array(entries)]))
    }
}

fn tagged(tag: &str, mut rest: Vec<Json>) -> Json {
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(Json::String(tag.to_string()));
    items.append(&mut rest);
    Json::Array(items)
}

fn parse_tagged_or_plain(items: &[Json]) -> Result<Node> {
    if let Some(Json::String(tag)) = items.first() {
        if let Some(node) = parse_tag(tag, &items[1..])? {
            return Ok(node);
        }
    }
    Ok(Node::List(items.iter().map(parse).collect::<Result<_>>()?))
}

fn parse_tag(tag: &str, rest: &[Json]) -> Result<Option<Node>> {
    let node = match tag {
        ".bytes" => {
            let [Json::String(b64)] = rest else {
                return Err(codec_err(".bytes expects one string argument"));
            };
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| codec_err(format!("invalid base64: {e}")))?;
            Node::Bytes(bytes)
        }
        ".bigint" => {
            let [Json::String(decimal)] = rest else {
                return Err(codec_err(".bigint expects one string argument"));
            };
            Node::Int(BigInt::from_str(decimal).map_err(|e| codec_err(format!("invalid bigint: {e}")))?)
        }
        ".tuple" => {
            let [Json::Array(items)] = rest else {
                return Err(codec_err(".tuple expects one array argument"));
            };
            Node::Tuple(items.iter().map(parse).collect::<Result<_>>()?)
        }
        ".set" => {
            let [Json::Array(items)] = rest else {
                return Err(codec_err(".set expects one array argument"));
            };
            Node::Set(items.iter().map(parse).collect::<Result<_>>()?)
        }
        ".dict" => {
            let [Json::Array(entries)] = rest else {
                return Err(codec_err(".dict expects one array argument"));
            };
            let mut pairs = Vec::with_capacity(entries.len());
            for entry in entries {
                let Json::Array(kv) = entry else {
                    return Err(codec_err(".dict entries must be [key, value] pairs"));
                };
                let [k, v] = kv.as_slice() else {
                    return Err(codec_err(".dict entries must be [key, value] pairs"));
                };
                pairs.push((parse(k)?, parse(v)?));
            }
            Node::Dict(pairs)
        }
        ".type" => {
            let [Json::String(name)] = rest else {
                return Err(codec_err(".type expects one string argument"));
            };
            Node::TypeRef(name.clone())
        }
        ".enum" => {
            let [Json::String(name)] = rest else {
                return Err(codec_err(".enum expects one string argument"));
            };
            Node::EnumRef(name.clone())
        }
        ".ext" => {
            let [Json::String(type_name), Json::String(stable_id)] = rest else {
                return Err(codec_err(".ext expects two string arguments"));
            };
            Node::External {
                type_name: type_name.clone(),
                stable_id: stable_id.clone(),
            }
        }
        ".inst" => {
            let [Json::String(type_name), body, version] = rest else {
                return Err(codec_err(".inst expects type name, body, version"));
            };
            Node::Instance {
                type_name: type_name.clone(),
                body: Box::new(parse(body)?),
                version: match version {
                    Json::Null => None,
                    Json::Number(n) => {
                        Some(n.as_u64().ok_or_else(|| codec_err("version must be a non-negative integer"))? as u32)
                    }
                    _ => return Err(codec_err("version must be a number or null")),
                },
            }
        }
        ".ref" => {
            let [id, inner] = rest else {
                return Err(codec_err(".ref expects id and inner node"));
            };
            Node::Reference {
                id: parse_ref_id(id)?,
                inner: Box::new(parse(inner)?),
            }
        }
        ".deref" => {
            let [id] = rest else {
                return Err(codec_err(".deref expects one id argument"));
            };
            Node::Dereference(parse_ref_id(id)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(node))
}

fn parse_ref_id(json: &Json) -> Result<RefId> {
    json.as_u64().ok_or_else(|| codec_err("ref id must be a non-negative integer"))
}

fn parse_object_dict(map: &Map<String, Json>) -> Result<Node> {
    let mut pairs = Vec::with_capacity(map.len());
    for (k, v) in map {
        pairs.push((Node::Text(k.clone()), parse(v)?));
    }
    Ok(Node::Dict(pairs))
}

/// Serializes `node` to a compact JSON string.
pub fn to_string(node: &Node) -> Result<String> {
    serde_json::to_string(&emit(node)?).map_err(|e| codec_err(e.to_string()))
}

/// Parses a JSON string into a `Node`.
pub fn from_str(text: &str) -> Result<Node> {
    let json: Json = serde_json::from_str(text).map_err(|e| codec_err(e.to_string()))?;
    parse(&json)
}
