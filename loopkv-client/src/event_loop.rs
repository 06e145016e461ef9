//! # Event Loop
//!
//! Purpose: Own the connection, the command registry and every timer on one
//! dedicated thread, and multiplex them with a single `select!`.
//!
//! ## Design Principles
//! 1. **Single Consumer**: Only this thread touches registered commands, so
//!    command state needs no locking.
//! 2. **Signal, Then Drain**: Callers push into a queue and signal; each
//!    iteration drains both queues before waiting again, so a signal that
//!    arrives while the loop is busy is never lost.
//! 3. **FIFO Matching**: RESP2 replies arrive in request order; `in_flight`
//!    mirrors the write order to pair each reply with its command.
//! 4. **Bounded Shutdown**: Replies for sent commands get a short grace period,
//!    then every remaining command is completed with a failure status.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use hashbrown::HashMap;
use tokio::runtime::Builder;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use loopkv_common::RespValue;

use crate::client::Inner;
use crate::command::{Dispatch, Outcome, Status};
use crate::config::Endpoint;
use crate::connection::{self, ReplyReader, RequestWriter};
use crate::queue::Retirement;
use crate::state::ConnectionState;
use crate::timer;

/// Body of the event-loop thread: build the runtime, connect, run, shut down.
pub(crate) fn run_event_thread(inner: Arc<Inner>, endpoint: Endpoint) {
    inner.mark_loop_thread(thread::current().id());

    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "could not create the event loop");
            inner.state.transition(ConnectionState::InitError);
            return;
        }
    };

    runtime.block_on(async {
        let (reader, writer) = match connection::open(&endpoint, &inner.config).await {
            Ok(halves) => halves,
            Err(err) => {
                error!(%endpoint, error = %err, "could not connect");
                inner.state.transition(ConnectionState::ConnectError);
                return;
            }
        };

        inner.submissions.open();
        inner.retirements.open();
        inner.state.transition(ConnectionState::Connected);
        info!(%endpoint, "event loop started");

        EventLoop::new(inner.clone(), reader, writer).run().await;
    });

    info!("event loop thread exited");
}

struct EventLoop {
    inner: Arc<Inner>,
    reader: ReplyReader,
    writer: RequestWriter,
    registry: HashMap<u64, Box<dyn Dispatch>>,
    in_flight: VecDeque<u64>,
    fires_tx: UnboundedSender<u64>,
    fires_rx: UnboundedReceiver<u64>,
    link_lost: bool,
}

impl EventLoop {
    fn new(inner: Arc<Inner>, reader: ReplyReader, writer: RequestWriter) -> Self {
        let (fires_tx, fires_rx) = mpsc::unbounded_channel();
        EventLoop {
            inner,
            reader,
            writer,
            registry: HashMap::new(),
            in_flight: VecDeque::new(),
            fires_tx,
            fires_rx,
            link_lost: false,
        }
    }

    async fn run(mut self) {
        loop {
            if self.inner.to_exit.load(Ordering::Acquire) {
                break;
            }
            self.process_submissions();
            self.process_retirements();

            let no_wait = self.inner.no_wait.load(Ordering::Relaxed);
            let has_writes = self.writer.has_pending();

            tokio::select! {
                biased;
                _ = self.inner.control.notified() => {}
                _ = self.inner.submissions.notified() => {}
                _ = self.inner.retirements.notified() => {}
                Some(id) = self.fires_rx.recv() => self.on_timer(id),
                written = self.writer.write_some(), if has_writes => {
                    if let Err(err) = written {
                        self.on_link_lost(err);
                    }
                }
                read = self.reader.fill() => self.on_readable(read),
                _ = tokio::task::yield_now(), if no_wait => {}
            }
        }
        self.shutdown().await;
    }

    fn process_submissions(&mut self) {
        for mut command in self.inner.submissions.drain() {
            let id = command.id();
            let schedule = command.schedule();
            command.admit();
            self.registry.insert(id, command);

            if schedule.is_immediate() {
                self.send(id);
            } else {
                let guard = timer::arm(id, schedule, self.fires_tx.clone());
                if let Some(command) = self.registry.get_mut(&id) {
                    command.arm(guard);
                }
            }
        }
    }

    fn process_retirements(&mut self) {
        for retirement in self.inner.retirements.drain() {
            match retirement {
                Retirement::Completed(command) => drop(command),
                Retirement::Released(id) => {
                    // The submission was queued before the release; pick it up first.
                    if !self.registry.contains_key(&id) {
                        self.process_submissions();
                    }
                    match self.registry.remove(&id) {
                        Some(command) => debug!(id, cmd = command.cmd(), "command released"),
                        None => debug!(id, "release for a command already freed"),
                    }
                }
            }
        }
    }

    fn on_timer(&mut self, id: u64) {
        let Some(command) = self.registry.get(&id) else {
            return;
        };
        if command.pending() > 0 {
            self.inner.ledger.record_overlap();
            warn!(id, cmd = command.cmd(), "previous send still outstanding, skipping timer firing");
            return;
        }
        self.send(id);
    }

    fn send(&mut self, id: u64) {
        let exiting = self.inner.to_exit.load(Ordering::Acquire) || self.link_lost;
        let Some(command) = self.registry.get_mut(&id) else {
            return;
        };
        command.mark_sent();

        let rejected = if exiting || self.writer.is_closing() {
            Some("client is exiting".to_string())
        } else {
            self.writer.enqueue(command.payload()).err().map(|err| err.to_string())
        };

        match rejected {
            None => self.in_flight.push_back(id),
            Some(reason) => {
                error!(id, cmd = command.cmd(), %reason, "could not send command");
                self.finish(id, Outcome::Failed(Status::SendError));
            }
        }
    }

    fn on_readable(&mut self, read: io::Result<usize>) {
        match read {
            Ok(0) => self.on_link_lost(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )),
            Ok(_) => loop {
                match self.reader.next_reply() {
                    Ok(Some(reply)) => self.on_reply(reply),
                    Ok(None) => break,
                    Err(err) => {
                        self.on_link_lost(io::Error::new(io::ErrorKind::InvalidData, err));
                        break;
                    }
                }
            },
            Err(err) => self.on_link_lost(err),
        }
    }

    fn on_reply(&mut self, reply: RespValue) {
        match self.in_flight.pop_front() {
            Some(id) => self.finish(id, Outcome::Reply(reply)),
            None => warn!(kind = reply.kind(), "reply without a pending command"),
        }
    }

    /// Completes one send of `id`; auto-free commands move to the free queue.
    fn finish(&mut self, id: u64, outcome: Outcome) {
        let Some(command) = self.registry.get_mut(&id) else {
            debug!(id, "dropping reply for a released command");
            return;
        };
        command.complete(outcome);
        if !command.free_on_completion() {
            return;
        }
        if let Some(command) = self.registry.remove(&id) {
            if let Err(rejected) = self.inner.retirements.push(Retirement::Completed(command)) {
                drop(rejected);
            }
        }
    }

    fn on_link_lost(&mut self, err: io::Error) {
        if self.link_lost {
            return;
        }
        self.link_lost = true;
        error!(error = %err, "connection lost");
        self.inner.state.transition(ConnectionState::DisconnectError);
        self.inner.to_exit.store(true, Ordering::Release);

        while let Some(id) = self.in_flight.pop_front() {
            self.finish(id, Outcome::Failed(Status::SendError));
        }
    }

    async fn shutdown(&mut self) {
        info!(
            registered = self.registry.len(),
            in_flight = self.in_flight.len(),
            "stop signal detected, closing down event loop"
        );

        for command in self.registry.values_mut() {
            command.disarm();
        }
        for mut command in self.inner.submissions.close() {
            command.complete(Outcome::Failed(Status::SendError));
        }

        self.await_in_flight().await;
        while let Some(id) = self.in_flight.pop_front() {
            self.finish(id, Outcome::Failed(Status::TimeoutError));
        }

        let unsent: Vec<u64> = self
            .registry
            .values()
            .filter(|command| !command.has_completed() && command.pending() == 0)
            .map(|command| command.id())
            .collect();
        for id in unsent {
            self.finish(id, Outcome::Failed(Status::SendError));
        }

        if !self.link_lost {
            match self.writer.close().await {
                Ok(()) => {
                    self.inner.state.transition(ConnectionState::Disconnected);
                }
                Err(err) => {
                    warn!(error = %err, "error while closing the connection");
                    self.inner.state.transition(ConnectionState::DisconnectError);
                }
            }
        }

        self.registry.clear();
        drop(self.inner.retirements.close());

        let unretired = self.inner.ledger.unretired();
        let stats = self.inner.ledger.snapshot();
        if unretired != 0 {
            error!(
                unretired,
                created = stats.created,
                destroyed = stats.destroyed,
                "not all commands were freed"
            );
        } else {
            debug!(created = stats.created, "all commands freed");
        }
    }

    /// Keeps writing and reading until every sent command has a reply or the
    /// grace period runs out.
    async fn await_in_flight(&mut self) {
        if self.link_lost || self.in_flight.is_empty() {
            return;
        }
        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        while !self.in_flight.is_empty() && !self.link_lost {
            let has_writes = self.writer.has_pending();
            tokio::select! {
                _ = time::sleep_until(deadline) => {
                    warn!(remaining = self.in_flight.len(), "shutdown grace period elapsed");
                    break;
                }
                written = self.writer.write_some(), if has_writes => {
                    if let Err(err) = written {
                        self.on_link_lost(err);
                    }
                }
                read = self.reader.fill() => self.on_readable(read),
            }
        }
    }
}
