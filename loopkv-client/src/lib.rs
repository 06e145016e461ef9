//! # LoopKV Client Runtime
//!
//! Purpose: Asynchronous, thread-safe RESP2 client. Callers on any thread
//! submit commands; one dedicated event-loop thread owns the connection,
//! sends them (immediately, after a delay, or on a repeating timer) and runs
//! their callbacks as replies arrive.
//!
//! ## Design Principles
//! 1. **One Loop Thread**: All socket IO, timers and callbacks run on a single
//!    current-thread tokio runtime, so commands need no per-field locking.
//! 2. **Explicit Ownership**: Submitted commands belong to the runtime; callers
//!    hold a `CommandHandle` and release a command by dropping it.
//! 3. **Exactly-Once Completion**: Every send ends in exactly one callback,
//!    including sends cut short by disconnect or shutdown.
//! 4. **Protocol Clarity**: RESP2 framing lives in `loopkv-common`.

mod client;
mod command;
mod config;
mod connection;
mod error;
mod event_loop;
mod handle;
mod queue;
mod reply;
mod state;
mod timer;

pub use client::Client;
pub use command::{join_args, split_args, Payload, Reply, RuntimeStats, Schedule, Status};
pub use config::{ClientConfig, Endpoint, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SOCKET_PATH};
pub use error::{ClientError, ClientResult};
pub use handle::CommandHandle;
pub use loopkv_common::{FormattedPayload, ProtocolError, RespValue};
pub use reply::{FromReply, Mismatch};
pub use state::{ConnectionState, StateCallback};
