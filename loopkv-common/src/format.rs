//! # Formatted Payloads
//!
//! Purpose: Encode a request once and share the encoded bytes between every
//! send of a delayed or looping command.
//!
//! ## Design Principles
//! 1. **Encode Once**: The RESP frame is built at construction time.
//! 2. **Shared Ownership**: The buffer is a `Bytes`; clones bump a reference
//!    count and the allocation is released when the last clone drops.
//! 3. **Familiar Templates**: `format` accepts `SET %s %s`-style templates
//!    with binary-safe arguments.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};
use crate::resp::encode_command;

/// Immutable, pre-encoded request buffer.
#[derive(Clone)]
pub struct FormattedPayload {
    encoded: Bytes,
    template: Arc<str>,
}

impl FormattedPayload {
    /// Encodes an argument list.
    pub fn from_args<A: AsRef<[u8]>>(args: &[A]) -> ProtocolResult<Self> {
        if args.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        let mut buf = BytesMut::with_capacity(64);
        encode_command(args, &mut buf);
        let template = args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg.as_ref()).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(FormattedPayload {
            encoded: buf.freeze(),
            template: Arc::from(template),
        })
    }

    /// Encodes a template such as `"SET %s %s"`.
    ///
    /// Tokens are separated by ASCII whitespace. Inside a token `%s` and `%b`
    /// splice in the next argument and `%%` is a literal percent sign. A token
    /// that consists only of a directive still counts as an argument, so an
    /// empty value stays an empty argument rather than disappearing.
    ///
    /// # Errors
    /// Returns `ProtocolError::FormatArity` when the number of directives does
    /// not match `args`, `UnknownDirective` for anything but `s`, `b` or `%`,
    /// and `EmptyCommand` for a blank template.
    pub fn format(template: &str, args: &[&[u8]]) -> ProtocolResult<Self> {
        let expected = count_directives(template)?;
        if expected != args.len() {
            return Err(ProtocolError::FormatArity {
                expected,
                provided: args.len(),
            });
        }

        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut next_arg = args.iter();
        for token in template.split_ascii_whitespace() {
            let mut part = Vec::with_capacity(token.len());
            let mut chars = token.chars();
            while let Some(ch) = chars.next() {
                if ch != '%' {
                    let mut utf8 = [0u8; 4];
                    part.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                    continue;
                }
                match chars.next() {
                    Some('%') => part.push(b'%'),
                    Some('s') | Some('b') => {
                        if let Some(arg) = next_arg.next() {
                            part.extend_from_slice(arg);
                        }
                    }
                    Some(other) => return Err(ProtocolError::UnknownDirective(other)),
                    None => return Err(ProtocolError::UnknownDirective(' ')),
                }
            }
            parts.push(part);
        }

        if parts.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        let mut buf = BytesMut::with_capacity(64);
        encode_command(&parts, &mut buf);
        Ok(FormattedPayload {
            encoded: buf.freeze(),
            template: Arc::from(template),
        })
    }

    /// Encoded RESP bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Cheap handle to the shared buffer.
    #[inline]
    pub fn bytes(&self) -> Bytes {
        self.encoded.clone()
    }

    /// Encoded length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    /// Returns true if nothing was encoded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// The template (or joined arguments) this payload was built from.
    pub fn template(&self) -> &str {
        &self.template
    }
}

impl fmt::Debug for FormattedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormattedPayload({:?}, {}B)", self.template, self.len())
    }
}

fn count_directives(template: &str) -> ProtocolResult<usize> {
    let mut count = 0;
    let mut chars = template.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            continue;
        }
        match chars.next() {
            Some('%') => {}
            Some('s') | Some('b') => count += 1,
            Some(other) => return Err(ProtocolError::UnknownDirective(other)),
            None => return Err(ProtocolError::UnknownDirective(' ')),
        }
    }
    Ok(count)
}
