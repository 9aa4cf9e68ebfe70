//! # Envelope Format
//!
//! Purpose: Tag encoded payloads with their kind so decode can rebuild the
//! original variant.
//!
//! ## Wire Shape
//!
//! ```text
//! JSON family:   {"__type__":"<kind>","__data__":<payload>}
//! Opaque family: MessagePack map { "__type__": "numpy"|"pickle", "__data__": <Value> }
//! ```
//!
//! The JSON family is compact UTF-8 text with `__type__` first. The opaque
//! family always starts with a MessagePack map marker (0x80..=0x8f), which is
//! never a valid first byte of UTF-8 text.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Field holding the kind tag.
pub const TYPE_FIELD: &str = "__type__";
/// Field holding the payload.
pub const DATA_FIELD: &str = "__data__";

/// Closed set of envelope kind tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bytes,
    Int,
    Float,
    Str,
    List,
    Dict,
    Tuple,
    Numpy,
    Pickle,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Bytes => "bytes",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Str => "str",
            Kind::List => "list",
            Kind::Dict => "dict",
            Kind::Tuple => "tuple",
            Kind::Numpy => "numpy",
            Kind::Pickle => "pickle",
        }
    }

    /// Parses a tag; unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Kind> {
        let kind = match tag {
            "bytes" => Kind::Bytes,
            "int" => Kind::Int,
            "float" => Kind::Float,
            "str" => Kind::Str,
            "list" => Kind::List,
            "dict" => Kind::Dict,
            "tuple" => Kind::Tuple,
            "numpy" => Kind::Numpy,
            "pickle" => Kind::Pickle,
            _ => return None,
        };
        Some(kind)
    }

    /// True for kinds carried by the opaque binary codec.
    pub fn is_opaque(self) -> bool {
        matches!(self, Kind::Numpy | Kind::Pickle)
    }
}

/// Logical envelope produced by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Base64 text of raw binary data.
    Bytes(String),
    /// `int`, `float` or `str` with its JSON payload.
    Scalar(Kind, serde_json::Value),
    /// `list`, `dict` or `tuple` with its JSON payload.
    Container(Kind, serde_json::Value),
    /// `numpy` or `pickle` carried by the binary codec.
    Opaque(Kind, Value),
}

#[derive(Serialize)]
struct TaggedRef<'a, T: ?Sized> {
    #[serde(rename = "__type__")]
    kind: &'a str,
    #[serde(rename = "__data__")]
    payload: &'a T,
}

#[derive(Deserialize)]
pub(crate) struct TaggedOwned<T> {
    #[serde(rename = "__type__")]
    pub(crate) kind: String,
    #[serde(rename = "__data__")]
    pub(crate) payload: T,
}

impl Envelope {
    pub fn kind(&self) -> Kind {
        match self {
            Envelope::Bytes(_) => Kind::Bytes,
            Envelope::Scalar(kind, _) | Envelope::Container(kind, _) | Envelope::Opaque(kind, _) => {
                *kind
            }
        }
    }

    /// Serializes the envelope into its wire bytes.
    pub fn to_wire(&self) -> CodecResult<Vec<u8>> {
        let kind = self.kind().as_str();
        match self {
            Envelope::Bytes(encoded) => json_bytes(kind, encoded),
            Envelope::Scalar(_, payload) | Envelope::Container(_, payload) => {
                json_bytes(kind, payload)
            }
            Envelope::Opaque(_, value) => {
                let bytes = rmp_serde::to_vec_named(&TaggedRef {
                    kind,
                    payload: value,
                })?;
                Ok(bytes)
            }
        }
    }
}

fn json_bytes<T: Serialize + ?Sized>(kind: &'static str, payload: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(&TaggedRef { kind, payload }).map_err(|e| CodecError::NotRepresentable {
        kind,
        reason: e.to_string(),
    })
}
