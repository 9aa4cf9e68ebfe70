//! # Wire Values
//!
//! What the codec hands to the store and gets back from it: a byte string, or
//! a bare integer for the boolean fast path.

/// Representation stored in, or read from, the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireValue {
    Bytes(Vec<u8>),
    /// Native integer as produced by the boolean path or returned by a transport.
    Int(i64),
}

impl WireValue {
    /// Bytes as the store persists them; integers become ASCII decimal.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            WireValue::Bytes(data) => data.clone(),
            WireValue::Int(n) => n.to_string().into_bytes(),
        }
    }

    /// Consumes the value, returning the stored bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WireValue::Bytes(data) => data,
            WireValue::Int(n) => n.to_string().into_bytes(),
        }
    }

    /// Encoded length in bytes, as seen by size limits.
    pub fn len(&self) -> usize {
        match self {
            WireValue::Bytes(data) => data.len(),
            WireValue::Int(n) => n.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(data: Vec<u8>) -> Self {
        WireValue::Bytes(data)
    }
}

impl From<&[u8]> for WireValue {
    fn from(data: &[u8]) -> Self {
        WireValue::Bytes(data.to_vec())
    }
}
