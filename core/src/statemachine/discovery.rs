//! Discovery state machine

use std::sync::Mutex;

use crate::protocol::error::{Error, ErrorKind, Result};

/// States of the discovery subsystem (advertising and/or scanning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryState {
    Uninitialized,
    Idle,
    Advertising,
    Scanning,
    /// Advertising and scanning at the same time.
    Active,
    Error,
}

impl DiscoveryState {
    pub fn name(self) -> &'static str {
        match self {
            DiscoveryState::Uninitialized => "Uninitialized",
            DiscoveryState::Idle => "Idle",
            DiscoveryState::Advertising => "Advertising",
            DiscoveryState::Scanning => "Scanning",
            DiscoveryState::Active => "Active",
            DiscoveryState::Error => "Error",
        }
    }

    pub fn allowed_next(self) -> &'static [DiscoveryState] {
        use DiscoveryState::*;
        match self {
            Uninitialized => &[Idle],
            Idle => &[Advertising, Scanning, Active, Error],
            Advertising => &[Active, Idle, Scanning],
            Scanning => &[Active, Idle, Advertising],
            Active => &[Advertising, Scanning, Idle],
            Error => &[Idle, Uninitialized],
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            DiscoveryState::Advertising | DiscoveryState::Scanning | DiscoveryState::Active
        )
    }
}

type StateChangedCallback = Box<dyn Fn(DiscoveryState, DiscoveryState) + Send>;

struct Inner {
    state: DiscoveryState,
    state_changed: Option<StateChangedCallback>,
}

/// Mutex-guarded discovery state with validated transitions.
pub struct DiscoveryStateMachine {
    inner: Mutex<Inner>,
}

impl Default for DiscoveryStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryStateMachine {
    pub fn new() -> Self {
        DiscoveryStateMachine {
            inner: Mutex::new(Inner {
                state: DiscoveryState::Idle,
                state_changed: None,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::new(ErrorKind::InvalidState, "state machine lock poisoned"))
    }

    pub fn current(&self) -> DiscoveryState {
        self.lock().map(|i| i.state).unwrap_or(DiscoveryState::Error)
    }

    pub fn transition(&self, to: DiscoveryState) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.state.allowed_next().contains(&to) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!(
                    "invalid discovery transition: {} -> {}",
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

    pub fn force_transition(&self, to: DiscoveryState) {
        if let Ok(mut inner) = self.lock() {
            let from = inner.state;
            inner.state = to;
            if let Some(cb) = &inner.state_changed {
                cb(from, to);
            }
        }
    }

    pub fn can_transition(&self, to: DiscoveryState) -> bool {
        self.lock()
            .map(|i| i.state.allowed_next().contains(&to))
            .unwrap_or(false)
    }

    pub fn valid_transitions(&self) -> &'static [DiscoveryState] {
        self.current().allowed_next()
    }

    pub fn is_active(&self) -> bool {
        self.current().is_active()
    }

    /// Back to `Idle`, emitting one change iff the state differed.
    pub fn reset(&self) {
        if let Ok(mut inner) = self.lock() {
            let from = inner.state;
            inner.state = DiscoveryState::Idle;
            if from != DiscoveryState::Idle {
                if let Some(cb) = &inner.state_changed {
                    cb(from, DiscoveryState::Idle);
                }
            }
        }
    }

    pub fn on_state_changed(
        &self,
        callback: impl Fn(DiscoveryState, DiscoveryState) + Send + 'static,
    ) {
        if let Ok(mut inner) = self.lock() {
            inner.state_changed = Some(Box::new(callback));
        }
    }
}
