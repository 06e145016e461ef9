use thiserror::Error;

use loopkv_common::ProtocolError;

use crate::command::Status;

/// Result type for the client runtime.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by setup paths and the blocking convenience wrappers.
///
/// Per-command failures are not raised; they arrive through the command's
/// own `Reply` with a non-`Ok` status.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The handshake did not finish within `ClientConfig::connect_timeout`.
    #[error("connect timed out")]
    ConnectTimeout,
    /// The endpoint kind is not available on this platform.
    #[error("unsupported endpoint: {0}")]
    Unsupported(&'static str),
    /// A synchronous command finished with a status other than `Ok`.
    #[error("command \"{cmd}\" failed with {status}")]
    Command {
        cmd: String,
        status: Status,
        message: Option<String>,
    },
}
