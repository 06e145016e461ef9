//! Caller side of a command: the completion cell written by the event loop and
//! the handle that reads it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::command::{Reply, Status};
use crate::queue::{FreeQueue, Retirement};

struct Slot<R> {
    status: Status,
    reply: Option<Reply<R>>,
    completions: u64,
}

/// Status and latest reply of one command, shared with its handle.
pub(crate) struct Shared<R> {
    id: u64,
    cmd: Arc<str>,
    slot: Mutex<Slot<R>>,
    settled: Condvar,
}

impl<R> Shared<R> {
    pub(crate) fn new(id: u64, cmd: Arc<str>) -> Self {
        Shared {
            id,
            cmd,
            slot: Mutex::new(Slot {
                status: Status::Pending,
                reply: None,
                completions: 0,
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn mark_sent(&self) {
        self.slot.lock().status = Status::Sent;
    }

    pub(crate) fn publish(&self, reply: Reply<R>) {
        {
            let mut slot = self.slot.lock();
            slot.status = reply.status;
            slot.reply = Some(reply);
            slot.completions += 1;
        }
        self.settled.notify_all();
    }

    pub(crate) fn status(&self) -> Status {
        self.slot.lock().status
    }

    pub(crate) fn completions(&self) -> u64 {
        self.slot.lock().completions
    }

    pub(crate) fn error(&self) -> Option<String> {
        self.slot
            .lock()
            .reply
            .as_ref()
            .and_then(|reply| reply.error.clone())
    }

    fn wait(&self) -> Status {
        let mut slot = self.slot.lock();
        while !slot.status.is_terminal() {
            self.settled.wait(&mut slot);
        }
        slot.status
    }

    fn wait_until(&self, deadline: Instant) -> Option<Status> {
        let mut slot = self.slot.lock();
        while !slot.status.is_terminal() {
            if self.settled.wait_until(&mut slot, deadline).timed_out() {
                return slot.status.is_terminal().then_some(slot.status);
            }
        }
        Some(slot.status)
    }
}

/// Caller's view of a submitted command.
///
/// Dropping the handle releases the command: the event loop stops its timer
/// and frees it. Handles of commands rejected at submission hold nothing to
/// release.
#[must_use = "dropping a CommandHandle releases the command"]
pub struct CommandHandle<R> {
    shared: Arc<Shared<R>>,
    release: Option<Arc<FreeQueue>>,
}

impl<R> CommandHandle<R> {
    pub(crate) fn new(shared: Arc<Shared<R>>, release: Option<Arc<FreeQueue>>) -> Self {
        CommandHandle { shared, release }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn cmd(&self) -> &str {
        &self.shared.cmd
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    pub fn ok(&self) -> bool {
        self.status() == Status::Ok
    }

    /// Blocks until the command has an outcome.
    pub fn wait(&self) -> Status {
        self.shared.wait()
    }

    /// Like `wait`, giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Status> {
        self.shared.wait_until(Instant::now() + timeout)
    }

    /// How many times the command has completed; grows for looping commands.
    pub fn completions(&self) -> u64 {
        self.shared.completions()
    }

    pub fn error(&self) -> Option<String> {
        self.shared.error()
    }

    /// Removes the latest reply from the handle.
    pub fn take_reply(&self) -> Option<Reply<R>> {
        self.shared.slot.lock().reply.take()
    }

    /// Releases the command now instead of at drop.
    pub fn release(self) {}
}

impl<R: Clone> CommandHandle<R> {
    /// Copy of the latest reply.
    pub fn reply(&self) -> Option<Reply<R>> {
        self.shared.slot.lock().reply.clone()
    }
}

impl<R> Drop for CommandHandle<R> {
    fn drop(&mut self) {
        if let Some(queue) = self.release.take() {
            // A closed queue means the event loop already freed the command.
            if queue.push(Retirement::Released(self.shared.id)).is_err() {
                trace!(id = self.shared.id, "release after shutdown");
            }
        }
    }
}
