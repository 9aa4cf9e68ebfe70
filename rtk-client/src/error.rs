//! # Error Taxonomy
//!
//! Two layers:
//! - `ClientError`: the store could not be reached or answered badly.
//! - `ToolkitError`: what facade callers see. It separates "the value could
//!   not be encoded" from "the input broke a configured limit" from "the store
//!   failed", so callers can decide between fixing input, retrying, or alerting.

use std::io;

use rtk_common::CodecError;
use thiserror::Error;

/// Result type for transport calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type for facade calls.
pub type ToolkitResult<T> = Result<T, ToolkitError>;

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ClientError {
    /// True when the connection itself is gone or unreachable.
    pub fn is_connection(&self) -> bool {
        match self {
            ClientError::ConnectionClosed => true,
            ClientError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::AddrNotAvailable
            ),
            _ => false,
        }
    }

    /// True for read/write/connect timeouts.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Errors worth retrying on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        self.is_connection() || self.is_timeout()
    }
}

/// Errors surfaced by the toolkit facade.
#[derive(Debug, Error)]
pub enum ToolkitError {
    /// The value could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),
    /// A key or value violated a configured limit. Nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The store was unreachable or returned an error.
    #[error("store operation failed: {0}")]
    Transport(#[from] ClientError),
}

impl ToolkitError {
    pub fn is_serialization(&self) -> bool {
        matches!(self, ToolkitError::Serialization(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ToolkitError::Validation(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ToolkitError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_failures() {
        assert!(ClientError::ConnectionClosed.is_connection());
        assert!(ClientError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)).is_connection());
        assert!(!ClientError::Protocol.is_connection());
        assert!(!ClientError::Server { message: b"ERR x".to_vec() }.is_retryable());
        assert!(ClientError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_retryable());
    }

    #[test]
    fn server_error_renders_message() {
        let err = ClientError::Server {
            message: b"ERR unknown command".to_vec(),
        };
        assert_eq!(err.to_string(), "server error: ERR unknown command");
    }

    #[test]
    fn toolkit_error_kinds_are_distinguishable() {
        let codec = ToolkitError::from(CodecError::Opaque("x".into()));
        assert!(codec.is_serialization() && !codec.is_transport());
        let transport = ToolkitError::from(ClientError::PoolExhausted);
        assert!(transport.is_transport());
        assert!(ToolkitError::Validation("too long".into()).is_validation());
    }
}
