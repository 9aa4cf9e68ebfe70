//! # Value Codec
//!
//! Purpose: Map a `Value` to the bytes (or integer) written to the store and
//! back again, without any shared state.
//!
//! ## Encoding Order
//! 1. `Null` becomes the reserved sentinel `__NONE__`.
//! 2. `Bool` becomes a bare integer 0/1.
//! 3. `Bytes` becomes a JSON envelope with base64 payload.
//! 4. `Int`/`Float`/`Str` become JSON envelopes. A float JSON cannot carry
//!    (NaN, infinities) drops to the opaque path instead.
//! 5. `List`/`Tuple`/`Dict` become JSON envelopes, or fail. They never fall
//!    back to the opaque path.
//! 6. `Array` is carried by the opaque codec under `numpy`.
//! 7. `Object` is carried by the opaque codec under `pickle`.
//!
//! ## Known Collision
//! Integers 0 and 1 decode as booleans. The stored format cannot tell them
//! apart and existing data depends on this, so it is kept.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;

use crate::envelope::{Envelope, Kind, TaggedOwned, DATA_FIELD, TYPE_FIELD};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use crate::wire::WireValue;

/// Stored form of `Value::Null`.
///
/// JSON envelopes start with `{` and opaque envelopes with a MessagePack map
/// marker, so no encoded value can equal this sequence.
pub const NULL_SENTINEL: &[u8] = b"__NONE__";

/// Encodes a value for storage.
pub fn encode(value: &Value) -> CodecResult<WireValue> {
    let envelope = match value {
        Value::Null => return Ok(WireValue::Bytes(NULL_SENTINEL.to_vec())),
        Value::Bool(b) => return Ok(WireValue::Int(i64::from(*b))),
        Value::Bytes(data) => Envelope::Bytes(BASE64.encode(data)),
        Value::Int(n) => Envelope::Scalar(Kind::Int, serde_json::Value::from(*n)),
        Value::Float(x) => match serde_json::Number::from_f64(*x) {
            Some(number) => Envelope::Scalar(Kind::Float, serde_json::Value::Number(number)),
            None => Envelope::Opaque(Kind::Pickle, value.clone()),
        },
        Value::Str(s) => Envelope::Scalar(Kind::Str, serde_json::Value::String(s.clone())),
        Value::List(_) => Envelope::Container(Kind::List, to_json(value, "list")?),
        Value::Tuple(_) => Envelope::Container(Kind::Tuple, to_json(value, "tuple")?),
        Value::Dict(_) => Envelope::Container(Kind::Dict, to_json(value, "dict")?),
        Value::Array(_) => Envelope::Opaque(Kind::Numpy, value.clone()),
        Value::Object(_) => Envelope::Opaque(Kind::Pickle, value.clone()),
    };
    envelope.to_wire().map(WireValue::Bytes)
}

/// Decodes a stored value. Never fails: unrecognised input comes back as text
/// or raw bytes.
pub fn decode(wire: &WireValue) -> Value {
    match wire {
        WireValue::Int(0) => Value::Bool(false),
        WireValue::Int(1) => Value::Bool(true),
        WireValue::Int(n) => Value::Int(*n),
        WireValue::Bytes(data) => decode_bytes(data),
    }
}

/// Decodes raw stored bytes.
pub fn decode_bytes(data: &[u8]) -> Value {
    if data == NULL_SENTINEL {
        return Value::Null;
    }
    match data {
        b"0" => return Value::Bool(false),
        b"1" => return Value::Bool(true),
        _ => {}
    }

    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(_) => return decode_opaque(data),
    };

    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(_) => return decode_opaque(data),
    };

    match parsed {
        serde_json::Value::Object(mut map)
            if map.contains_key(TYPE_FIELD) && map.contains_key(DATA_FIELD) =>
        {
            let tag = map.remove(TYPE_FIELD);
            let payload = map.remove(DATA_FIELD).unwrap_or(serde_json::Value::Null);
            let kind = tag.as_ref().and_then(|t| t.as_str()).and_then(Kind::parse);
            unwrap_json_envelope(kind, payload)
        }
        other => from_json(other),
    }
}

fn unwrap_json_envelope(kind: Option<Kind>, payload: serde_json::Value) -> Value {
    match (kind, payload) {
        (Some(Kind::Bytes), serde_json::Value::String(encoded)) => match BASE64.decode(&encoded) {
            Ok(data) => Value::Bytes(data),
            Err(err) => {
                debug!(error = %err, "bytes envelope holds invalid base64");
                Value::Str(encoded)
            }
        },
        (Some(Kind::Int), serde_json::Value::Number(n)) => match n.as_i64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            Some(v) => Value::Int(v),
            None => from_json(serde_json::Value::Number(n)),
        },
        (Some(Kind::Float), serde_json::Value::Number(n)) => {
            n.as_f64().map_or(Value::Null, Value::Float)
        }
        (Some(Kind::Str), serde_json::Value::String(s)) => Value::Str(s),
        (Some(Kind::Tuple), serde_json::Value::Array(items)) => {
            Value::Tuple(items.into_iter().map(from_json).collect())
        }
        // list, dict, numpy, pickle, unknown kinds and mismatched payloads
        (_, payload) => from_json(payload),
    }
}

/// Opaque-codec fallback for bytes that are not a JSON envelope.
fn decode_opaque(data: &[u8]) -> Value {
    match rmp_serde::from_slice::<TaggedOwned<Value>>(data) {
        Ok(tagged) => {
            if !Kind::parse(&tagged.kind).is_some_and(Kind::is_opaque) {
                debug!(kind = %tagged.kind, "opaque envelope with unexpected kind");
            }
            tagged.payload
        }
        Err(_) => match std::str::from_utf8(data) {
            Ok(text) => Value::Str(text.to_string()),
            Err(_) => Value::Bytes(data.to_vec()),
        },
    }
}

/// Converts a container to JSON, failing on anything JSON cannot carry.
fn to_json(value: &Value, kind: &'static str) -> CodecResult<serde_json::Value> {
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .ok_or_else(|| CodecError::NotRepresentable {
                kind,
                reason: format!("float {} is out of range for JSON", x),
            })?,
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) | Value::Tuple(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| to_json(item, kind))
                .collect::<CodecResult<_>>()?,
        ),
        Value::Dict(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_json(v, kind)?)))
                .collect::<CodecResult<_>>()?,
        ),
        Value::Bytes(_) | Value::Array(_) | Value::Object(_) => {
            return Err(CodecError::NotRepresentable {
                kind,
                reason: format!("element of kind {} is not JSON serializable", value.kind_name()),
            })
        }
    };
    Ok(json)
}

/// Converts parsed JSON into a `Value`.
fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(v) => Value::Int(v),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::Dict(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}
