// rtk-common - Value model and wire codec shared by the toolkit crates
//
// This crate has no I/O: it maps in-memory values to the byte/int
// representation stored in the key-value store and back.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod value;
pub mod wire;

// Re-export for convenience
pub use codec::{decode, decode_bytes, encode, NULL_SENTINEL};
pub use envelope::{Envelope, Kind};
pub use error::{CodecError, CodecResult};
pub use value::{NumericArray, Object, Value};
pub use wire::WireValue;
