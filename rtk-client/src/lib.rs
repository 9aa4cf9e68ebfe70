//! # Redis Toolkit Client
//!
//! Purpose: Store and publish typed values in a Redis-compatible store, and
//! run a background subscriber that hands decoded messages to user code.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Codec at the Edge**: Values are encoded right before a write and
//!    decoded right after a read; the transport only sees bytes.
//! 3. **Swappable Transport**: The facade and subscriber depend on the
//!    `Transport` trait, not on the RESP client.
//! 4. **Injected Logging**: A `Logger` travels with each toolkit instance.

mod client;
mod error;
mod logging;
mod options;
mod pool;
mod resp;
mod retry;
mod subscriber;
mod toolkit;
mod transport;

#[cfg(test)]
mod testing;

pub use client::{ClientConfig, KVClient, RespSubscription};
pub use error::{ClientError, ClientResult, ToolkitError, ToolkitResult};
pub use logging::{format_value, truncate, Logger};
pub use options::{ConnectionConfig, ToolkitOptions};
pub use retry::RetryPolicy;
pub use subscriber::{
    MessageHandler, SubscriberManager, SubscriberSettings, SubscriberState, CONTROL_CHANNEL,
};
pub use toolkit::{Toolkit, ToolkitBuilder};
pub use transport::{Message, MessageKind, Pipeline, PipelineOp, Subscription, Transport};

pub use rtk_common::{decode, decode_bytes, encode, CodecError, NumericArray, Object, Value, WireValue};
