//! # Commands
//!
//! Purpose: Model one logical request from submission to destruction:
//! payload, schedule, callback, status and the in-flight counter.
//!
//! ## Design Principles
//! 1. **Single Owner**: Once submitted, a `Command` is owned by the runtime and
//!    only touched on the event-loop thread; callers keep an `Arc` to the
//!    completion cell, never to the command itself.
//! 2. **Type Erasure at the Queue**: Commands of every reply type travel
//!    through the queues as `Box<dyn Dispatch>`; the reply type only matters
//!    when a reply is converted.
//! 3. **Counted Lifetimes**: Construction and `Drop` feed a shared ledger so a
//!    leak or double free shows up as a count mismatch at shutdown.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{error, trace};

use loopkv_common::{encode_command, FormattedPayload, RespValue};

use crate::handle::Shared;
use crate::reply::{FromReply, Mismatch};
use crate::timer::TimerGuard;

/// Completion status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Created, not yet handed to the connection.
    Pending,
    /// Written to the connection, waiting for the reply.
    Sent,
    /// Reply received and converted.
    Ok,
    /// The server answered nil.
    NilReply,
    /// The server answered with an error reply.
    ErrorReply,
    /// The reply could not be converted into the declared type.
    WrongType,
    /// The request never reached the server.
    SendError,
    /// No reply arrived before shutdown.
    TimeoutError,
}

impl Status {
    /// Returns true once the command has an outcome.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending | Status::Sent)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Sent => "sent",
            Status::Ok => "ok",
            Status::NilReply => "nil reply",
            Status::ErrorReply => "error reply",
            Status::WrongType => "wrong type",
            Status::SendError => "send error",
            Status::TimeoutError => "timeout",
        };
        f.write_str(name)
    }
}

/// Request body: an argument list or a pre-encoded buffer.
#[derive(Debug, Clone)]
pub enum Payload {
    Args(Vec<Vec<u8>>),
    Formatted(FormattedPayload),
}

impl Payload {
    /// Human-readable command line for logs.
    pub fn describe(&self) -> String {
        match self {
            Payload::Args(args) => args
                .iter()
                .map(|arg| String::from_utf8_lossy(arg))
                .collect::<Vec<_>>()
                .join(" "),
            Payload::Formatted(formatted) => formatted.template().to_string(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Payload::Args(args) => args.is_empty(),
            Payload::Formatted(formatted) => formatted.is_empty(),
        }
    }

    pub(crate) fn encode_into(&self, out: &mut BytesMut) {
        match self {
            Payload::Args(args) => encode_command(args.as_slice(), out),
            Payload::Formatted(formatted) => out.extend_from_slice(formatted.as_bytes()),
        }
    }
}

impl<const N: usize> From<[&str; N]> for Payload {
    fn from(args: [&str; N]) -> Self {
        Payload::Args(args.iter().map(|arg| arg.as_bytes().to_vec()).collect())
    }
}

impl From<&[&str]> for Payload {
    fn from(args: &[&str]) -> Self {
        Payload::Args(args.iter().map(|arg| arg.as_bytes().to_vec()).collect())
    }
}

impl From<Vec<&str>> for Payload {
    fn from(args: Vec<&str>) -> Self {
        Payload::from(args.as_slice())
    }
}

impl From<Vec<String>> for Payload {
    fn from(args: Vec<String>) -> Self {
        Payload::Args(args.into_iter().map(String::into_bytes).collect())
    }
}

impl From<&[&[u8]]> for Payload {
    fn from(args: &[&[u8]]) -> Self {
        Payload::Args(args.iter().map(|arg| arg.to_vec()).collect())
    }
}

impl From<Vec<Vec<u8>>> for Payload {
    fn from(args: Vec<Vec<u8>>) -> Self {
        Payload::Args(args)
    }
}

impl From<FormattedPayload> for Payload {
    fn from(formatted: FormattedPayload) -> Self {
        Payload::Formatted(formatted)
    }
}

/// When a command is sent: after `after`, then every `repeat` if non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Schedule {
    pub after: Duration,
    pub repeat: Duration,
}

impl Schedule {
    /// Send on the next drain of the submission queue.
    pub const IMMEDIATE: Schedule = Schedule {
        after: Duration::ZERO,
        repeat: Duration::ZERO,
    };

    pub fn delayed(after: Duration) -> Self {
        Schedule {
            after,
            repeat: Duration::ZERO,
        }
    }

    pub fn repeating(repeat: Duration, after: Duration) -> Self {
        Schedule { after, repeat }
    }

    /// No timer involved.
    pub fn is_immediate(&self) -> bool {
        self.after.is_zero() && self.repeat.is_zero()
    }

    pub fn is_looping(&self) -> bool {
        !self.repeat.is_zero()
    }
}

/// What a callback sees when a send completes.
#[derive(Debug, Clone)]
pub struct Reply<R> {
    pub(crate) id: u64,
    pub(crate) cmd: Arc<str>,
    pub(crate) status: Status,
    pub(crate) value: Option<R>,
    pub(crate) error: Option<String>,
}

impl<R> Reply<R> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The command line, for logging.
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Converted reply; present only when `ok()`.
    pub fn value(&self) -> Option<&R> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<R> {
        self.value
    }

    /// Server error text or conversion failure detail.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Result of one send, as reported by the connection.
#[derive(Debug)]
pub(crate) enum Outcome {
    Reply(RespValue),
    Failed(Status),
}

pub(crate) type Callback<R> = Box<dyn FnMut(&Reply<R>) + Send>;

/// Operations the event loop needs from a command, independent of `R`.
pub(crate) trait Dispatch: Send {
    fn id(&self) -> u64;
    fn cmd(&self) -> &str;
    fn payload(&self) -> &Payload;
    fn schedule(&self) -> Schedule;
    fn free_on_completion(&self) -> bool;
    /// Sends currently awaiting a reply.
    fn pending(&self) -> u32;
    fn has_completed(&self) -> bool;
    fn mark_sent(&mut self);
    /// Records the outcome of one send and runs the callback.
    fn complete(&mut self, outcome: Outcome);
    fn arm(&mut self, timer: TimerGuard);
    fn disarm(&mut self);
    /// Marks the command as owned by the event loop.
    fn admit(&mut self);
}

/// Runtime-owned command.
pub(crate) struct Command<R: FromReply> {
    id: u64,
    cmd: Arc<str>,
    payload: Payload,
    callback: Option<Callback<R>>,
    schedule: Schedule,
    free_on_completion: bool,
    pending: u32,
    completions: u64,
    shared: Arc<Shared<R>>,
    timer: Option<TimerGuard>,
    admitted: bool,
    ledger: Arc<Ledger>,
}

impl<R: FromReply> Command<R> {
    pub(crate) fn new(
        id: u64,
        payload: Payload,
        callback: Option<Callback<R>>,
        schedule: Schedule,
        free_on_completion: bool,
        ledger: Arc<Ledger>,
    ) -> Self {
        let cmd: Arc<str> = Arc::from(payload.describe());
        ledger.created.fetch_add(1, Ordering::Relaxed);
        trace!(id, cmd = %cmd, "command created");
        Command {
            id,
            shared: Arc::new(Shared::new(id, cmd.clone())),
            cmd,
            payload,
            callback,
            schedule,
            free_on_completion,
            pending: 0,
            completions: 0,
            timer: None,
            admitted: false,
            ledger,
        }
    }

    pub(crate) fn shared(&self) -> Arc<Shared<R>> {
        self.shared.clone()
    }

    fn convert(&self, outcome: Outcome) -> Reply<R> {
        let (status, value, error) = match outcome {
            Outcome::Reply(RespValue::Error(message)) => (
                Status::ErrorReply,
                None,
                Some(String::from_utf8_lossy(&message).into_owned()),
            ),
            Outcome::Reply(value) => match R::from_reply(value) {
                Ok(value) => (Status::Ok, Some(value), None),
                Err(Mismatch::Nil) => (Status::NilReply, None, None),
                Err(Mismatch::WrongType(kind)) => (
                    Status::WrongType,
                    None,
                    Some(format!("unexpected {kind} reply")),
                ),
            },
            Outcome::Failed(status) => (status, None, None),
        };
        Reply {
            id: self.id,
            cmd: self.cmd.clone(),
            status,
            value,
            error,
        }
    }
}

impl<R: FromReply> Dispatch for Command<R> {
    fn id(&self) -> u64 {
        self.id
    }

    fn cmd(&self) -> &str {
        &self.cmd
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn free_on_completion(&self) -> bool {
        self.free_on_completion
    }

    fn pending(&self) -> u32 {
        self.pending
    }

    fn has_completed(&self) -> bool {
        self.completions > 0
    }

    fn mark_sent(&mut self) {
        self.pending += 1;
        self.shared.mark_sent();
    }

    fn complete(&mut self, outcome: Outcome) {
        self.pending = self.pending.saturating_sub(1);
        self.completions += 1;
        let reply = self.convert(outcome);
        trace!(id = self.id, status = %reply.status, "command completed");

        if let Some(callback) = self.callback.as_mut() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&reply)));
            if result.is_err() {
                error!(id = self.id, cmd = %self.cmd, "command callback panicked");
            }
        }
        self.shared.publish(reply);
    }

    fn arm(&mut self, timer: TimerGuard) {
        self.timer = Some(timer);
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
    }

    fn admit(&mut self) {
        if !self.admitted {
            self.admitted = true;
            self.ledger.admitted.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<R: FromReply> Drop for Command<R> {
    fn drop(&mut self) {
        self.disarm();
        self.ledger.destroyed.fetch_add(1, Ordering::Relaxed);
        if self.admitted {
            self.ledger.retired.fetch_add(1, Ordering::Relaxed);
        }
        trace!(id = self.id, "command destroyed");
    }
}

/// Created/destroyed bookkeeping shared by every command of one client.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    created: AtomicU64,
    destroyed: AtomicU64,
    // Commands the event loop took ownership of, and how many of those dropped.
    // Rejected commands complete on caller threads and never count here.
    admitted: AtomicU64,
    retired: AtomicU64,
    overlapped: AtomicU64,
}

impl Ledger {
    /// Event-loop owned commands not yet dropped. Only meaningful on the loop
    /// thread, which is the sole place admitted commands are dropped.
    pub(crate) fn unretired(&self) -> u64 {
        let retired = self.retired.load(Ordering::Acquire);
        self.admitted.load(Ordering::Acquire).saturating_sub(retired)
    }

    pub(crate) fn record_overlap(&self) {
        self.overlapped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RuntimeStats {
        // Destroyed first: a command is always counted created before destroyed.
        let destroyed = self.destroyed.load(Ordering::Acquire);
        RuntimeStats {
            created: self.created.load(Ordering::Acquire),
            destroyed,
            overlapped_fires: self.overlapped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time command counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeStats {
    pub created: u64,
    pub destroyed: u64,
    /// Timer firings skipped because the previous send was still outstanding.
    pub overlapped_fires: u64,
}

impl RuntimeStats {
    /// Commands currently alive.
    pub fn live(&self) -> u64 {
        self.created.saturating_sub(self.destroyed)
    }
}

/// Joins arguments into a single command line.
pub fn join_args<S: AsRef<str>>(args: &[S], delimiter: char) -> String {
    let mut out = String::new();
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            out.push(delimiter);
        }
        out.push_str(arg.as_ref());
    }
    out
}

/// Splits a command line on `delimiter`. Empty fields are kept.
pub fn split_args(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter).map(str::to_string).collect()
}
