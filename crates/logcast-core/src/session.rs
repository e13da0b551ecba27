//! Lifecycle states of a viewer connection.
//!
//! ```text
//! Accepted ──► Registered ──► Active ──► Closing ──► Closed
//!     │                          ▲          ▲
//!     └──────────────────────────┼──────────┘   (handshake or setup failure)
//!                                └── inbound traffic keeps it Active
//! ```
//!
//! The connection handler in `logcast-server` drives one of these per
//! connection and logs every transition.  The only cleanup that matters,
//! unregistering from the [`ViewerRegistry`](crate::ViewerRegistry), happens
//! on the way into `Closed`.

use std::fmt;

use thiserror::Error;

/// Where a viewer connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    /// TCP accepted, WebSocket handshake not yet complete.
    Accepted,
    /// Handshake done and the viewer is in the registry.
    Registered,
    /// Reading (and discarding) inbound frames while broadcasts flow out.
    Active,
    /// Peer close, error, or shutdown observed; cleanup in progress.
    Closing,
    /// Unregistered and socket released.
    Closed,
}

/// An attempted transition that the lifecycle does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid viewer state transition {from} -> {to}")]
pub struct StateError {
    pub from: ViewerState,
    pub to: ViewerState,
}

impl ViewerState {
    /// Returns `true` if the lifecycle permits moving from `self` to `next`.
    pub fn can_advance_to(self, next: ViewerState) -> bool {
        use ViewerState::*;
        matches!(
            (self, next),
            (Accepted, Registered)
                | (Accepted, Closing)
                | (Registered, Active)
                | (Registered, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    /// Moves to `next`, or reports why it cannot.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] for any transition not in the diagram above.
    pub fn advance(&mut self, next: ViewerState) -> Result<(), StateError> {
        if !self.can_advance_to(next) {
            return Err(StateError { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    /// `true` while the viewer should be receiving broadcasts.
    pub fn is_eligible(self) -> bool {
        matches!(self, ViewerState::Registered | ViewerState::Active)
    }
}

impl fmt::Display for ViewerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewerState::Accepted => "accepted",
            ViewerState::Registered => "registered",
            ViewerState::Active => "active",
            ViewerState::Closing => "closing",
            ViewerState::Closed => "closed",
        };
        f.write_str(name)
    }
}
