//! # Client Facade
//!
//! Purpose: Public entry point. Owns the event-loop thread and turns caller
//! requests into queued commands.
//!
//! ## Design Principles
//! 1. **Thread-Safe Surface**: Every method takes `&self` and may be called
//!    from any thread while the loop runs.
//! 2. **Fail Fast**: A command created while the client is not connected
//!    completes with `SendError` on the calling thread and is never queued.
//! 3. **Deterministic Teardown**: `disconnect` (and `Drop`) returns only after
//!    the loop thread has completed and freed every command.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use loopkv_common::RespValue;

use crate::command::{Callback, Command, Ledger, Outcome, Payload, Reply, RuntimeStats, Schedule, Status};
use crate::config::{ClientConfig, Endpoint};
use crate::error::{ClientError, ClientResult};
use crate::event_loop::run_event_thread;
use crate::handle::CommandHandle;
use crate::queue::{FreeQueue, SubmissionQueue};
use crate::reply::FromReply;
use crate::state::{ConnectionState, StateCell};

/// State shared between the facade and the event-loop thread.
pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    pub(crate) state: StateCell,
    pub(crate) submissions: SubmissionQueue,
    pub(crate) retirements: Arc<FreeQueue>,
    pub(crate) to_exit: AtomicBool,
    pub(crate) no_wait: AtomicBool,
    pub(crate) control: Notify,
    pub(crate) ledger: Arc<Ledger>,
    next_id: AtomicU64,
    loop_thread: OnceLock<ThreadId>,
}

impl Inner {
    pub(crate) fn mark_loop_thread(&self, id: ThreadId) {
        let _ = self.loop_thread.set(id);
    }

    fn on_loop_thread(&self) -> bool {
        self.loop_thread.get() == Some(&thread::current().id())
    }
}

/// Asynchronous RESP2 client driven by a dedicated event-loop thread.
pub struct Client {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new() -> Self {
        Client::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let inner = Inner {
            no_wait: AtomicBool::new(config.no_wait),
            config,
            state: StateCell::new(),
            submissions: SubmissionQueue::new(),
            retirements: Arc::new(FreeQueue::new()),
            to_exit: AtomicBool::new(false),
            control: Notify::new(),
            ledger: Arc::new(Ledger::default()),
            next_id: AtomicU64::new(1),
            loop_thread: OnceLock::new(),
        };
        Client {
            inner: Arc::new(inner),
            thread: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Registers a callback run on every state transition. Set it before
    /// connecting to observe the handshake.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state.set_callback(Arc::new(callback));
    }

    /// Connects over TCP and blocks until the handshake settles.
    ///
    /// A state callback registered with `on_state_change` (or passed to
    /// `connect_with_callback`) sees every transition of the handshake.
    pub fn connect(&self, host: &str, port: u16) -> bool {
        self.connect_endpoint(Endpoint::tcp(host, port))
    }

    /// Registers `callback` for state transitions, then connects to `endpoint`.
    pub fn connect_with_callback<F>(&self, endpoint: Endpoint, callback: F) -> bool
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.on_state_change(callback);
        self.connect_endpoint(endpoint)
    }

    /// Connects over a unix domain socket.
    pub fn connect_unix(&self, path: impl Into<PathBuf>) -> bool {
        self.connect_endpoint(Endpoint::unix(path))
    }

    /// Starts the event loop against `endpoint`. Returns true once connected.
    ///
    /// Only valid from `NotYetConnected`; a client that failed to connect is
    /// spent and should be replaced. On failure the event-loop thread has
    /// already been joined when this returns.
    pub fn connect_endpoint(&self, endpoint: Endpoint) -> bool {
        {
            let mut thread = self.thread.lock();
            let state = self.state();
            if thread.is_some() || state != ConnectionState::NotYetConnected {
                warn!(%state, "connect called on a client that already started");
                return false;
            }

            info!(%endpoint, "connecting");
            let inner = self.inner.clone();
            let spawned = thread::Builder::new()
                .name("loopkv-event-loop".to_string())
                .spawn(move || run_event_thread(inner, endpoint));
            match spawned {
                Ok(handle) => *thread = Some(handle),
                Err(err) => {
                    error!(error = %err, "could not spawn the event loop thread");
                    self.inner.state.transition(ConnectionState::InitError);
                    return false;
                }
            }
        }

        let settled = self.inner.state.wait_settled();
        if settled == ConnectionState::Connected {
            return true;
        }
        // The loop returns right after a failed handshake.
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("event loop thread panicked");
            }
        }
        debug!(state = %settled, "connect failed, event loop joined");
        false
    }

    /// Asks the event loop to exit and returns immediately.
    pub fn stop(&self) {
        self.inner.to_exit.store(true, Ordering::Release);
        self.inner.control.notify_one();
        debug!("stop requested");
    }

    /// Blocks until the event loop has exited and freed every command.
    pub fn wait(&self) {
        if self.inner.on_loop_thread() {
            error!("wait called from the event loop thread, not joining");
            return;
        }
        let mut thread = self.thread.lock();
        if let Some(handle) = thread.take() {
            if handle.join().is_err() {
                error!("event loop thread panicked");
            }
        }
    }

    /// `stop` followed by `wait`.
    pub fn disconnect(&self) {
        self.stop();
        self.wait();
    }

    /// Busy-polls the event loop instead of sleeping between events.
    /// Lowers latency at the cost of a fully used core.
    pub fn no_wait(&self, enabled: bool) {
        self.inner.no_wait.store(enabled, Ordering::Relaxed);
        self.inner.control.notify_one();
        info!(enabled, "no-wait mode changed");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn stats(&self) -> RuntimeStats {
        self.inner.ledger.snapshot()
    }

    /// Fire-and-forget: the reply is discarded.
    pub fn submit(&self, payload: impl Into<Payload>) {
        let _ = self.dispatch::<RespValue>(payload.into(), None, Schedule::IMMEDIATE, true);
    }

    /// Sends once and runs `callback` on the event-loop thread with the reply.
    pub fn submit_with<R, F>(&self, payload: impl Into<Payload>, callback: F)
    where
        R: FromReply,
        F: FnMut(&Reply<R>) + Send + 'static,
    {
        let _ = self.dispatch::<R>(payload.into(), Some(Box::new(callback)), Schedule::IMMEDIATE, true);
    }

    /// Sends once and blocks until the reply arrives.
    ///
    /// From the event-loop thread (inside a callback) this returns at once
    /// with the command still pending.
    pub fn submit_sync<R: FromReply>(&self, payload: impl Into<Payload>) -> CommandHandle<R> {
        let handle = self.dispatch::<R>(payload.into(), None, Schedule::IMMEDIATE, false);
        if self.inner.on_loop_thread() {
            error!(cmd = handle.cmd(), "submit_sync called from the event loop thread, not waiting");
        } else {
            handle.wait();
        }
        handle
    }

    /// Sends once, blocks, and reports whether the reply was ok.
    pub fn submit_ok(&self, payload: impl Into<Payload>) -> bool {
        self.submit_sync::<RespValue>(payload).ok()
    }

    /// Sends once after `after`.
    pub fn submit_delayed<R, F>(&self, payload: impl Into<Payload>, callback: F, after: Duration)
    where
        R: FromReply,
        F: FnMut(&Reply<R>) + Send + 'static,
    {
        let _ = self.dispatch::<R>(
            payload.into(),
            Some(Box::new(callback)),
            Schedule::delayed(after),
            true,
        );
    }

    /// Sends after `after`, then every `repeat`, until the handle is dropped.
    pub fn submit_loop<R, F>(
        &self,
        payload: impl Into<Payload>,
        callback: F,
        repeat: Duration,
        after: Duration,
    ) -> CommandHandle<R>
    where
        R: FromReply,
        F: FnMut(&Reply<R>) + Send + 'static,
    {
        self.dispatch::<R>(
            payload.into(),
            Some(Box::new(callback)),
            Schedule::repeating(repeat, after),
            false,
        )
    }

    /// `GET key`. Nil maps to `None`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> ClientResult<Option<Vec<u8>>> {
        let handle = self.submit_sync::<Vec<u8>>(vec![b"GET".to_vec(), key.as_ref().to_vec()]);
        match handle.status() {
            Status::Ok => Ok(handle.take_reply().and_then(Reply::into_value)),
            Status::NilReply => Ok(None),
            status => Err(ClientError::Command {
                cmd: handle.cmd().to_string(),
                status,
                message: handle.error(),
            }),
        }
    }

    /// `SET key value`.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> bool {
        self.submit_ok(vec![
            b"SET".to_vec(),
            key.as_ref().to_vec(),
            value.as_ref().to_vec(),
        ])
    }

    /// `DEL key`.
    pub fn del(&self, key: impl AsRef<[u8]>) -> bool {
        self.submit_ok(vec![b"DEL".to_vec(), key.as_ref().to_vec()])
    }

    /// `PUBLISH topic message`, fire-and-forget.
    pub fn publish(&self, topic: impl AsRef<[u8]>, message: impl AsRef<[u8]>) {
        self.submit(vec![
            b"PUBLISH".to_vec(),
            topic.as_ref().to_vec(),
            message.as_ref().to_vec(),
        ]);
    }

    fn dispatch<R: FromReply>(
        &self,
        payload: Payload,
        callback: Option<Callback<R>>,
        schedule: Schedule,
        free_on_completion: bool,
    ) -> CommandHandle<R> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let command = Command::new(
            id,
            payload,
            callback,
            schedule,
            free_on_completion,
            self.inner.ledger.clone(),
        );
        let shared = command.shared();

        match self.inner.submissions.push(Box::new(command)) {
            Ok(()) => {
                let release = (!free_on_completion).then(|| self.inner.retirements.clone());
                CommandHandle::new(shared, release)
            }
            Err(mut rejected) => {
                error!(
                    id,
                    cmd = rejected.cmd(),
                    state = %self.state(),
                    "client is not connected, dropping command"
                );
                rejected.complete(Outcome::Failed(Status::SendError));
                CommandHandle::new(shared, None)
            }
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
