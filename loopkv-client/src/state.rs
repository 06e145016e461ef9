//! # Connection State Machine
//!
//! Purpose: Track the connection lifecycle with an explicit transition table
//! and let callers block until the connect handshake settles.
//!
//! ```text
//! NotYetConnected ──┬──> Connected ──┬──> Disconnected
//!                   │                └──> DisconnectError
//!                   ├──> ConnectError
//!                   └──> InitError
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

/// Callback invoked once per state transition.
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Starting state.
    NotYetConnected,
    /// Handshake finished and the event loop is running.
    Connected,
    /// Disconnected as requested.
    Disconnected,
    /// Could not reach the server.
    ConnectError,
    /// The connection dropped or failed after it was established.
    DisconnectError,
    /// The event loop or its resources could not be created.
    InitError,
}

impl ConnectionState {
    /// Returns true when no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected
                | ConnectionState::DisconnectError
                | ConnectionState::ConnectError
                | ConnectionState::InitError
        )
    }

    /// Transition table.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (NotYetConnected, Connected)
                | (NotYetConnected, ConnectError)
                | (NotYetConnected, InitError)
                | (Connected, Disconnected)
                | (Connected, DisconnectError)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotYetConnected => "not-yet-connected",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::ConnectError => "connect-error",
            ConnectionState::DisconnectError => "disconnect-error",
            ConnectionState::InitError => "init-error",
        };
        f.write_str(name)
    }
}

/// Shared state cell with a condition for the connect wait.
pub(crate) struct StateCell {
    state: Mutex<ConnectionState>,
    changed: Condvar,
    callback: Mutex<Option<StateCallback>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell {
            state: Mutex::new(ConnectionState::NotYetConnected),
            changed: Condvar::new(),
            callback: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn set_callback(&self, callback: StateCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Applies `next` if the table allows it, wakes waiters, then runs the
    /// user callback outside the lock.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        {
            let mut state = self.state.lock();
            let current = *state;
            if !current.can_transition_to(next) {
                debug!(from = %current, to = %next, "ignoring state transition");
                return false;
            }
            *state = next;
        }
        self.changed.notify_all();

        match next {
            ConnectionState::Connected | ConnectionState::Disconnected => {
                info!(state = %next, "connection state changed")
            }
            _ => warn!(state = %next, "connection state changed"),
        }

        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(next);
        }
        true
    }

    /// Blocks until the handshake has produced a result.
    pub(crate) fn wait_settled(&self) -> ConnectionState {
        let mut state = self.state.lock();
        while *state == ConnectionState::NotYetConnected {
            self.changed.wait(&mut state);
        }
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn table_allows_only_documented_edges() {
        use ConnectionState::*;
        let all = [
            NotYetConnected,
            Connected,
            Disconnected,
            ConnectError,
            DisconnectError,
            InitError,
        ];
        let allowed = [
            (NotYetConnected, Connected),
            (NotYetConnected, ConnectError),
            (NotYetConnected, InitError),
            (Connected, Disconnected),
            (Connected, DisconnectError),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
        for state in all {
            if state.is_terminal() {
                assert!(all.iter().all(|next| !state.can_transition_to(*next)));
            }
        }
    }

    #[test]
    fn callback_fires_once_per_transition() {
        let cell = StateCell::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        cell.set_callback(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(cell.transition(ConnectionState::Connected));
        assert!(!cell.transition(ConnectionState::Connected));
        assert!(cell.transition(ConnectionState::DisconnectError));
        assert!(!cell.transition(ConnectionState::Disconnected));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cell.get(), ConnectionState::DisconnectError);
    }

    #[test]
    fn wait_settled_wakes_on_connect_error() {
        let cell = Arc::new(StateCell::new());
        let setter = cell.clone();
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            setter.transition(ConnectionState::ConnectError);
        });
        assert_eq!(cell.wait_settled(), ConnectionState::ConnectError);
        handle.join().unwrap();
    }
}
