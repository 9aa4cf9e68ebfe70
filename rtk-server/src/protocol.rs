//! # RESP2 Request Parsing and Reply Encoding
//!
//! Purpose: Turn bytes read from a socket into command argument vectors, and
//! build the replies the server writes back.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: `parse` consumes nothing until a whole command
//!    is buffered, so partial reads simply wait for more data.
//! 2. **Binary-Safe**: Bulk arguments are raw bytes.
//! 3. **Inline Fallback**: Plain text lines (`PING\r\n`) are accepted the way
//!    Redis accepts them from telnet sessions.

use bytes::{Buf, BytesMut};
use thiserror::Error;

const MAX_ARGS: usize = 1024 * 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RespError {
    #[error("Protocol error: {0}")]
    Protocol(&'static str),
}

/// Parser for client requests.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Parses one command from `buf`, advancing past it.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let parsed = if buf[0] == b'*' {
            parse_array(buf)?
        } else {
            parse_inline(buf)
        };
        Ok(parsed.map(|(args, consumed)| {
            buf.advance(consumed);
            args
        }))
    }
}

fn parse_array(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
    let Some(end) = find_crlf(buf, 0) else {
        return Ok(None);
    };
    let count = parse_len(&buf[1..end])?;
    if count > MAX_ARGS {
        return Err(RespError::Protocol("invalid multibulk length"));
    }

    let mut pos = end + 2;
    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(RespError::Protocol("expected '$'"));
        }
        let Some(end) = find_crlf(buf, pos) else {
            return Ok(None);
        };
        let len = parse_len(&buf[pos + 1..end])?;
        if len > MAX_BULK_LEN {
            return Err(RespError::Protocol("invalid bulk length"));
        }
        let start = end + 2;
        if buf.len() < start + len + 2 {
            return Ok(None);
        }
        if &buf[start + len..start + len + 2] != b"\r\n" {
            return Err(RespError::Protocol("expected CRLF after bulk"));
        }
        args.push(buf[start..start + len].to_vec());
        pos = start + len + 2;
    }
    Ok(Some((args, pos)))
}

fn parse_inline(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let newline = buf.iter().position(|&b| b == b'\n')?;
    let args = buf[..newline]
        .split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Some((args, newline + 1))
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .windows(2)
        .position(|window| window == b"\r\n")
        .map(|idx| idx + from)
}

fn parse_len(digits: &[u8]) -> Result<usize, RespError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(RespError::Protocol("invalid length"));
    }
    digits.iter().try_fold(0usize, |acc, &d| {
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add((d - b'0') as usize))
            .ok_or(RespError::Protocol("invalid length"))
    })
}

pub fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Error reply. `message` should start with an error code such as `ERR`.
pub fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    push_bulk(&mut buf, data);
    buf
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

pub fn push_array_header(buf: &mut Vec<u8>, len: usize) {
    buf.extend_from_slice(format!("*{}\r\n", len).as_bytes());
}

pub fn push_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Pub/sub frame: `[kind, channel, count]`, or `[kind, nil, count]` when
/// there is no channel to report.
pub fn resp_subscription(kind: &[u8], channel: Option<&[u8]>, count: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    push_array_header(&mut buf, 3);
    push_bulk(&mut buf, kind);
    match channel {
        Some(channel) => push_bulk(&mut buf, channel),
        None => buf.extend_from_slice(b"$-1\r\n"),
    }
    buf.extend_from_slice(format!(":{}\r\n", count).as_bytes());
    buf
}

/// Pub/sub delivery frame: `["message", channel, payload]`.
pub fn resp_message(channel: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(channel.len() + payload.len() + 32);
    push_array_header(&mut buf, 3);
    push_bulk(&mut buf, b"message");
    push_bulk(&mut buf, channel);
    push_bulk(&mut buf, payload);
    buf
}
