//! # RESP2 Encoding and Incremental Parsing
//!
//! Purpose: Encode client commands and decode server replies straight out of
//! the event loop's read buffer, tolerating frames split across reads.
//!
//! ## Design Principles
//! 1. **Peek, Then Consume**: A reply is only removed from the buffer once the
//!    whole frame is present, so partial reads never lose bytes.
//! 2. **Buffer Reuse**: Callers own the `BytesMut` buffers and keep them warm.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Largest bulk string accepted from the server (matches the Redis limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted from the server.
pub const MAX_NESTING: usize = 512;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null. Null arrays map here too.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Short name of the reply type, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::Simple(_) => "simple",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::Bulk(Some(_)) => "bulk",
            RespValue::Bulk(None) => "nil",
            RespValue::Array(_) => "array",
        }
    }

    /// Returns true for the null bulk string.
    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Bulk(None))
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Decodes one reply from the front of `buf`.
///
/// Returns `Ok(None)` without consuming anything when the buffer holds only
/// part of a frame.
pub fn parse_reply(buf: &mut BytesMut) -> ProtocolResult<Option<RespValue>> {
    match parse_at(&buf[..], 0, 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_at(data: &[u8], pos: usize, depth: usize) -> ProtocolResult<Option<(RespValue, usize)>> {
    let line_end = match find_crlf(data, pos) {
        Some(end) => end,
        None => return Ok(None),
    };
    if line_end == pos {
        return Err(ProtocolError::InvalidFrame("empty line"));
    }

    let line = &data[pos + 1..line_end];
    let next = line_end + 2;
    match data[pos] {
        b'+' => Ok(Some((RespValue::Simple(line.to_vec()), next))),
        b'-' => Ok(Some((RespValue::Error(line.to_vec()), next))),
        b':' => Ok(Some((RespValue::Integer(parse_i64(line)?), next))),
        b'$' => parse_bulk(data, parse_i64(line)?, next),
        b'*' => parse_array(data, parse_i64(line)?, next, depth),
        _ => Err(ProtocolError::InvalidFrame("unknown type byte")),
    }
}

fn parse_bulk(data: &[u8], len: i64, start: usize) -> ProtocolResult<Option<(RespValue, usize)>> {
    if len < 0 {
        return Ok(Some((RespValue::Bulk(None), start)));
    }
    let len = len as usize;
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let end = start + len;
    if data.len() < end + 2 {
        return Ok(None);
    }
    if &data[end..end + 2] != b"\r\n" {
        return Err(ProtocolError::InvalidFrame("bulk string missing CRLF"));
    }
    Ok(Some((RespValue::Bulk(Some(data[start..end].to_vec())), end + 2)))
}

fn parse_array(
    data: &[u8],
    len: i64,
    start: usize,
    depth: usize,
) -> ProtocolResult<Option<(RespValue, usize)>> {
    if len < 0 {
        return Ok(Some((RespValue::Bulk(None), start)));
    }
    if depth >= MAX_NESTING {
        return Err(ProtocolError::InvalidFrame("nesting too deep"));
    }
    let len = len as usize;
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    // Cap the preallocation; the announced length is untrusted.
    let mut items = Vec::with_capacity(len.min(1024));
    let mut cursor = start;
    for _ in 0..len {
        match parse_at(data, cursor, depth + 1)? {
            Some((item, next)) => {
                items.push(item);
                cursor = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(items), cursor)))
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < from + 2 {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|window| window == b"\r\n")
        .map(|offset| from + offset)
}

fn parse_i64(data: &[u8]) -> ProtocolResult<i64> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidFrame("empty integer"));
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }
    if idx == data.len() {
        return Err(ProtocolError::InvalidFrame("empty integer"));
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidFrame("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}
