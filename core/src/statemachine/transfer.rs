//! Transfer state machine
//!
//! Fixed transition table; `transition` validates against it,
//! `force_transition` bypasses validation for recovery paths. Callbacks
//! run while the internal mutex is held and must not re-enter the
//! machine.

use std::sync::Mutex;

use crate::protocol::error::{Error, ErrorKind, Result};

/// Lifecycle states of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Pending,
    AwaitingAccept,
    Preparing,
    InProgress,
    Paused,
    Completed,
    Cancelled,
    Rejected,
    Failed,
}

impl TransferState {
    pub fn name(self) -> &'static str {
        match self {
            TransferState::Pending => "Pending",
            TransferState::AwaitingAccept => "AwaitingAccept",
            TransferState::Preparing => "Preparing",
            TransferState::InProgress => "InProgress",
            TransferState::Paused => "Paused",
            TransferState::Completed => "Completed",
            TransferState::Cancelled => "Cancelled",
            TransferState::Rejected => "Rejected",
            TransferState::Failed => "Failed",
        }
    }

    /// The states allowed after this one.
    pub fn allowed_next(self) -> &'static [TransferState] {
        use TransferState::*;
        match self {
            Pending => &[AwaitingAccept, Cancelled, Failed],
            AwaitingAccept => &[Preparing, Rejected, Cancelled, Failed],
            Preparing => &[InProgress, Failed, Cancelled],
            InProgress => &[Paused, Completed, Cancelled, Failed],
            Paused => &[InProgress, Cancelled, Failed],
            Completed | Cancelled | Rejected | Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn is_active(self) -> bool {
        matches!(self, TransferState::InProgress | TransferState::Paused)
    }
}

type StateChangedCallback = Box<dyn Fn(TransferState, TransferState) + Send>;
type TerminalCallback = Box<dyn Fn(TransferState) + Send>;

struct Inner {
    state: TransferState,
    state_changed: Option<StateChangedCallback>,
    terminal: Option<TerminalCallback>,
}

/// Mutex-guarded transfer state with validated transitions.
pub struct TransferStateMachine {
    inner: Mutex<Inner>,
}

impl Default for TransferStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStateMachine {
    pub fn new() -> Self {
        Self::with_initial(TransferState::Pending)
    }

    pub fn with_initial(initial: TransferState) -> Self {
        TransferStateMachine {
            inner: Mutex::new(Inner {
                state: initial,
                state_changed: None,
                terminal: None,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::new(ErrorKind::InvalidState, "state machine lock poisoned"))
    }

    pub fn current(&self) -> TransferState {
        self.lock().map(|i| i.state).unwrap_or(TransferState::Failed)
    }

    /// Move to `to` if the table allows it.
    pub fn transition(&self, to: TransferState) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.state.allowed_next().contains(&to) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("invalid transition: {} -> {}", inner.state.name(), to.name()),
            ));
        }
        let from = inner.state;
        inner.state = to;
        Self::notify(&inner, from, to);
        Ok(())
    }

    /// Move to `to` unconditionally. Recovery only.
    pub fn force_transition(&self, to: TransferState) {
        if let Ok(mut inner) = self.lock() {
            let from = inner.state;
            inner.state = to;
            Self::notify(&inner, from, to);
        }
    }

    fn notify(inner: &Inner, from: TransferState, to: TransferState) {
        if let Some(cb) = &inner.state_changed {
            cb(from, to);
        }
        if to.is_terminal() {
            if let Some(cb) = &inner.terminal {
                cb(to);
            }
        }
    }

    pub fn can_transition(&self, to: TransferState) -> bool {
        self.lock()
            .map(|i| i.state.allowed_next().contains(&to))
            .unwrap_or(false)
    }

    pub fn valid_transitions(&self) -> &'static [TransferState] {
        self.current().allowed_next()
    }

    pub fn is_terminal(&self) -> bool {
        self.current().is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.current().is_active()
    }

    /// Back to `Pending`, emitting one change iff the state differed.
    pub fn reset(&self) {
        if let Ok(mut inner) = self.lock() {
            let from = inner.state;
            inner.state = TransferState::Pending;
            if from != TransferState::Pending {
                if let Some(cb) = &inner.state_changed {
                    cb(from, TransferState::Pending);
                }
            }
        }
    }

    pub fn on_state_changed(
        &self,
        callback: impl Fn(TransferState, TransferState) + Send + 'static,
    ) {
        if let Ok(mut inner) = self.lock() {
            inner.state_changed = Some(Box::new(callback));
        }
    }

    pub fn on_terminal(&self, callback: impl Fn(TransferState) + Send + 'static) {
        if let Ok(mut inner) = self.lock() {
            inner.terminal = Some(Box::new(callback));
        }
    }
}
