//! Dictation state machine with observable transitions.
//!
//! Valid transitions:
//! - Idle -> Listening (stream opened)
//! - Listening -> Idle (stopped, surface switched, or stream ended)
//! - Idle -> Unavailable (no usable recognition capability)
//! - Unavailable -> Listening (capability appeared on a later start)
//! - Unavailable -> Idle

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use cortex_core::error::{CortexError, Result};

/// Operational state of the dictation controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictationState {
    /// No recognition stream is open.
    Idle,
    /// A recognition stream is feeding an editor.
    Listening,
    /// The host has no continuous, interim-capable recognizer.
    Unavailable,
}

impl fmt::Display for DictationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictationState::Idle => write!(f, "Idle"),
            DictationState::Listening => write!(f, "Listening"),
            DictationState::Unavailable => write!(f, "Unavailable"),
        }
    }
}

impl DictationState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &DictationState) -> bool {
        matches!(
            (self, target),
            (DictationState::Idle, DictationState::Listening)
                | (DictationState::Listening, DictationState::Idle)
                | (DictationState::Idle, DictationState::Unavailable)
                | (DictationState::Unavailable, DictationState::Listening)
                | (DictationState::Unavailable, DictationState::Idle)
        )
    }
}

/// Shared dictation state with validated transitions.
///
/// The state lives in a `watch` channel so views can follow it. Clones share
/// the same cell.
#[derive(Debug, Clone)]
pub struct StateMachine {
    tx: Arc<watch::Sender<DictationState>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine initialized to `Idle`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DictationState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> DictationState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DictationState> {
        self.tx.subscribe()
    }

    /// Attempt to transition to the target state.
    ///
    /// Invalid transitions leave the state untouched and return
    /// [`CortexError::InvalidTransition`].
    pub fn transition(&self, target: DictationState) -> Result<()> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(&target) {
                tracing::debug!("Dictation state: {} -> {}", *state, target);
                *state = target;
                true
            } else {
                outcome = Err(CortexError::InvalidTransition {
                    from: state.to_string(),
                    to: target.to_string(),
                });
                false
            }
        });
        outcome
    }
}

// =============================================================================
// Tests
// =============================================================================
