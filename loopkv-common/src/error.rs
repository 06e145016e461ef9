//! Protocol-level errors.

use thiserror::Error;

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding requests or decoding replies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Reply framing did not follow RESP2.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// A bulk or array header announced more data than we accept.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    /// A request needs at least the command name.
    #[error("empty command")]
    EmptyCommand,
    /// Format directives and supplied arguments disagree.
    #[error("format expects {expected} arguments, got {provided}")]
    FormatArity { expected: usize, provided: usize },
    /// Only `%s`, `%b` and `%%` are understood.
    #[error("unknown format directive '%{0}'")]
    UnknownDirective(char),
}
