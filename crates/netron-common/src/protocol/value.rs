//! Self-describing value model.
//!
//! Every value crossing the wire carries a type tag, so the receiving side
//! reconstructs dates, maps, sets, big integers and byte buffers exactly
//! rather than collapsing them into plain JSON shapes. Two variants are
//! runtime-only: [`Value::Iface`] (a live proxy) and [`Value::Ctx`] (a live
//! local instance). The owning peer substitutes those for a [`Reference`] or
//! a bundled [`Definition`] before encoding; a live handle reaching the codec
//! unsubstituted is a protocol bug and encodes as an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use super::dispatch::{same_object, Callable, ContextObject};
use super::error::{ErrorDescriptor, NetronError, Result};
use super::reference::{Definition, Reference};

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    /// Arbitrary-precision integer lane (128-bit on this side of the wire).
    BigInt(i128),
    Float(f64),
    Str(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Ordered key/value pairs; keys may be any value, so this is not an
    /// `Object`.
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Error(ErrorDescriptor),
    Reference(Reference),
    Definition(Box<Definition>),
    /// Live proxy. Encodes as `Reference(def_id)` after peer substitution.
    Iface(Arc<dyn Callable>),
    /// Live local context instance. Peer substitution attaches it as a weak
    /// context and encodes the resulting `Definition`.
    Ctx(Arc<dyn ContextObject>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn object(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Object(entries.into_iter().collect())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_iface(&self) -> Option<&Arc<dyn Callable>> {
        match self {
            Value::Iface(iface) => Some(iface),
            _ => None,
        }
    }

    /// Encodes this value into its tagged JSON representation.
    pub fn to_wire(&self) -> Result<serde_json::Value> {
        let encoded = match self {
            Value::Undefined => json!({ "t": "undefined" }),
            Value::Null => json!({ "t": "null" }),
            Value::Bool(b) => json!({ "t": "bool", "v": b }),
            Value::Int(n) => json!({ "t": "int", "v": n }),
            // 128-bit integers exceed the JSON number range; ride as text.
            Value::BigInt(n) => json!({ "t": "bigint", "v": n.to_string() }),
            Value::Float(f) => {
                if f.is_finite() {
                    json!({ "t": "float", "v": f })
                } else {
                    json!({ "t": "float", "v": f.to_string() })
                }
            }
            Value::Str(s) => json!({ "t": "str", "v": s }),
            Value::Date(ms) => json!({ "t": "date", "v": ms }),
            Value::Bytes(bytes) => json!({ "t": "bytes", "v": BASE64.encode(bytes) }),
            Value::Array(items) => {
                let items: Result<Vec<_>> = items.iter().map(Value::to_wire).collect();
                json!({ "t": "array", "v": items? })
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), value.to_wire()?);
                }
                json!({ "t": "object", "v": out })
            }
            Value::Map(pairs) => {
                let pairs: Result<Vec<_>> = pairs
                    .iter()
                    .map(|(k, v)| Ok(serde_json::Value::Array(vec![k.to_wire()?, v.to_wire()?])))
                    .collect();
                json!({ "t": "map", "v": pairs? })
            }
            Value::Set(items) => {
                let items: Result<Vec<_>> = items.iter().map(Value::to_wire).collect();
                json!({ "t": "set", "v": items? })
            }
            Value::Error(descriptor) => {
                json!({ "t": "error", "v": serde_json::to_value(descriptor)? })
            }
            Value::Reference(reference) => json!({ "t": "ref", "v": reference.def_id }),
            Value::Definition(definition) => {
                json!({ "t": "def", "v": serde_json::to_value(definition)? })
            }
            Value::Iface(_) | Value::Ctx(_) => {
                return Err(NetronError::Codec(
                    "live object handle reached the codec without substitution".into(),
                ))
            }
        };
        Ok(encoded)
    }

    /// Decodes a value from its tagged JSON representation.
    pub fn from_wire(encoded: &serde_json::Value) -> Result<Value> {
        let tag = encoded
            .get("t")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| NetronError::Codec("value without a type tag".into()))?;
        let body = encoded.get("v");

        let decoded = match tag {
            "undefined" => Value::Undefined,
            "null" => Value::Null,
            "bool" => Value::Bool(expect(body, tag)?.as_bool().ok_or_else(|| bad(tag))?),
            "int" => Value::Int(expect(body, tag)?.as_i64().ok_or_else(|| bad(tag))?),
            "bigint" => {
                let text = expect(body, tag)?.as_str().ok_or_else(|| bad(tag))?;
                Value::BigInt(text.parse().map_err(|_| bad(tag))?)
            }
            "float" => match expect(body, tag)? {
                serde_json::Value::Number(n) => Value::Float(n.as_f64().ok_or_else(|| bad(tag))?),
                serde_json::Value::String(s) => Value::Float(s.parse().map_err(|_| bad(tag))?),
                _ => return Err(bad(tag)),
            },
            "str" => Value::Str(expect(body, tag)?.as_str().ok_or_else(|| bad(tag))?.into()),
            "date" => Value::Date(expect(body, tag)?.as_i64().ok_or_else(|| bad(tag))?),
            "bytes" => {
                let text = expect(body, tag)?.as_str().ok_or_else(|| bad(tag))?;
                Value::Bytes(BASE64.decode(text).map_err(|_| bad(tag))?)
            }
            "array" | "set" => {
                let items = expect(body, tag)?.as_array().ok_or_else(|| bad(tag))?;
                let items: Result<Vec<_>> = items.iter().map(Value::from_wire).collect();
                if tag == "array" {
                    Value::Array(items?)
                } else {
                    Value::Set(items?)
                }
            }
            "object" => {
                let entries = expect(body, tag)?.as_object().ok_or_else(|| bad(tag))?;
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), Value::from_wire(value)?);
                }
                Value::Object(map)
            }
            "map" => {
                let pairs = expect(body, tag)?.as_array().ok_or_else(|| bad(tag))?;
                let mut out = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let pair = pair.as_array().filter(|p| p.len() == 2).ok_or_else(|| bad(tag))?;
                    out.push((Value::from_wire(&pair[0])?, Value::from_wire(&pair[1])?));
                }
                Value::Map(out)
            }
            "error" => Value::Error(serde_json::from_value(expect(body, tag)?.clone())?),
            "ref" => Value::Reference(Reference::new(
                expect(body, tag)?.as_u64().ok_or_else(|| bad(tag))?,
            )),
            "def" => Value::Definition(Box::new(serde_json::from_value(
                expect(body, tag)?.clone(),
            )?)),
            other => {
                return Err(NetronError::Codec(format!("unknown value tag '{}'", other)))
            }
        };
        Ok(decoded)
    }
}

fn expect<'a>(body: Option<&'a serde_json::Value>, tag: &str) -> Result<&'a serde_json::Value> {
    body.ok_or_else(|| NetronError::Codec(format!("value tag '{}' without a body", tag)))
}

fn bad(tag: &str) -> NetronError {
    NetronError::Codec(format!("malformed body for value tag '{}'", tag))
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::BigInt(n) => write!(f, "BigInt({})", n),
            Value::Float(v) => write!(f, "Float({})", v),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Date(ms) => write!(f, "Date({})", ms),
            Value::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Value::Map(pairs) => f.debug_tuple("Map").field(pairs).finish(),
            Value::Set(items) => f.debug_tuple("Set").field(items).finish(),
            Value::Error(d) => f.debug_tuple("Error").field(d).finish(),
            Value::Reference(r) => write!(f, "Reference({})", r.def_id),
            Value::Definition(d) => write!(f, "Definition({} '{}')", d.id, d.name),
            Value::Iface(iface) => write!(f, "Iface({})", iface.def_id()),
            Value::Ctx(ctx) => write!(f, "Ctx('{}')", ctx.meta().name),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (Value::Definition(a), Value::Definition(b)) => a == b,
            (Value::Iface(a), Value::Iface(b)) => a.def_id() == b.def_id(),
            (Value::Ctx(a), Value::Ctx(b)) => same_object(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = serde_json::Value::deserialize(deserializer)?;
        Value::from_wire(&encoded).map_err(D::Error::custom)
    }
}
