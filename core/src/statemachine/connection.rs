//! Connection state machine

use std::sync::Mutex;

use crate::protocol::error::{Error, ErrorKind, Result};

/// Lifecycle states of a connection to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Establishing,
    Handshaking,
    Connected,
    Disconnecting,
    Lost,
    Error,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Establishing => "Establishing",
            ConnectionState::Handshaking => "Handshaking",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Lost => "Lost",
            ConnectionState::Error => "Error",
        }
    }

    pub fn allowed_next(self) -> &'static [ConnectionState] {
        use ConnectionState::*;
        match self {
            Disconnected => &[Connecting],
            Connecting => &[Establishing, Disconnected, Error],
            Establishing => &[Handshaking, Disconnected, Error],
            Handshaking => &[Connected, Disconnected, Error],
            Connected => &[Disconnecting, Lost],
            Disconnecting => &[Disconnected],
            Lost => &[Connecting, Disconnected],
            Error => &[Disconnected],
        }
    }
}

type StateChangedCallback = Box<dyn Fn(ConnectionState, ConnectionState) + Send>;

struct Inner {
    state: ConnectionState,
    state_changed: Option<StateChangedCallback>,
}

/// Mutex-guarded connection state with validated transitions.
pub struct ConnectionStateMachine {
    inner: Mutex<Inner>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        ConnectionStateMachine {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                state_changed: None,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::new(ErrorKind::InvalidState, "state machine lock poisoned"))
    }

    pub fn current(&self) -> ConnectionState {
        self.lock()
            .map(|i| i.state)
            .unwrap_or(ConnectionState::Error)
    }

    pub fn transition(&self, to: ConnectionState) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.state.allowed_next().contains(&to) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!(
                    "invalid connection transition: {} -> {}",
                    inner.state.name(),
                    to.name()
                ),
            ));
        }
        let from = inner.state;
        inner.state = to;
        if let Some(cb) = &inner.state_changed {
            cb(from, to);
        }
        Ok(())
    }

    pub fn force_transition(&self, to: ConnectionState) {
        if let Ok(mut inner) = self.lock() {
            let from = inner.state;
            inner.state = to;
            if let Some(cb) = &inner.state_changed {
                cb(from, to);
            }
        }
    }

    pub fn can_transition(&self, to: ConnectionState) -> bool {
        self.lock()
            .map(|i| i.state.allowed_next().contains(&to))
            .unwrap_or(false)
    }

    pub fn valid_transitions(&self) -> &'static [ConnectionState] {
        self.current().allowed_next()
    }

    pub fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }

    /// Back to `Disconnected`, emitting one change iff the state differed.
    pub fn reset(&self) {
        if let Ok(mut inner) = self.lock() {
            let from = inner.state;
            inner.state = ConnectionState::Disconnected;
            if from != ConnectionState::Disconnected {
                if let Some(cb) = &inner.state_changed {
                    cb(from, ConnectionState::Disconnected);
                }
            }
        }
    }

    pub fn on_state_changed(
        &self,
        callback: impl Fn(ConnectionState, ConnectionState) + Send + 'static,
    ) {
        if let Ok(mut inner) = self.lock() {
            inner.state_changed = Some(Box::new(callback));
        }
    }
}
