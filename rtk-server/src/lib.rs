//! # Redis Toolkit Development Server
//!
//! Purpose: Serve the RESP2 subset the toolkit client speaks (keys, pub/sub,
//! AUTH/SELECT) so the client can be exercised end to end without an
//! external Redis.
//!
//! ## Design Principles
//! 1. **Task per Connection**: Each client runs on its own Tokio task.
//! 2. **Pre-Encoded Pushes**: A published message is encoded once and the
//!    same bytes are queued to every subscriber.
//! 3. **Owned Runtime**: `ServerHandle` runs the server on a private runtime
//!    so synchronous callers and tests can start and stop it freely.

pub mod broker;
pub mod protocol;
pub mod server;
pub mod store;

pub use protocol::{RespError, RespParser};
pub use server::{handle_connection, serve, ServerHandle, Shared};
