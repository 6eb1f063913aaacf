//! Closeout lifecycle state machine.
//!
//! ```text
//!            claim                    close
//!   OPEN ────────────▶ FINALIZING ────────────▶ CLOSED
//!     ▲                  │   ▲
//!     └──── release ─────┘   └── claim (stale, older than the claim TTL)
//! ```
//!
//! `CLOSED` is terminal. Every transition is a guarded function of the current
//! phase; stores apply them as compare-and-swap updates so two concurrent
//! finalize calls can never both hold a claim on the same event.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque token identifying one finalize attempt's claim on an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    /// Creates a fresh token
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a token from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an event sits in the closeout lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CloseoutPhase {
    /// Commission inputs may change; no closeout has started
    Open,
    /// A finalize call holds the event
    Finalizing {
        /// Token of the holding attempt
        claim: ClaimToken,
        /// When the claim was taken
        claimed_at: DateTime<Utc>,
    },
    /// Terminal
    Closed {
        /// When the event was closed
        closed_at: DateTime<Utc>,
    },
}

/// A transition that the current phase does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The event is already closed
    #[error("event was already closed at {closed_at}")]
    AlreadyClosed {
        /// When it was closed
        closed_at: DateTime<Utc>,
    },

    /// Another finalize call holds a live claim
    #[error("another closeout has been in progress since {claimed_at}")]
    InProgress {
        /// When the live claim was taken
        claimed_at: DateTime<Utc>,
    },

    /// The caller's claim is no longer the one held on the event
    #[error("closeout claim {claim} is not held on this event")]
    ClaimLost {
        /// The caller's token
        claim: ClaimToken,
    },
}

impl CloseoutPhase {
    /// Database string for the phase discriminant
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Finalizing { .. } => "finalizing",
            Self::Closed { .. } => "closed",
        }
    }

    /// When the event was closed, if it has been
    #[must_use]
    pub const fn closed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Closed { closed_at } => Some(*closed_at),
            Self::Open | Self::Finalizing { .. } => None,
        }
    }

    /// Whether the phase is terminal
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Whether `claim` is the live claim on the event
    #[must_use]
    pub fn is_held_by(&self, claim: ClaimToken) -> bool {
        matches!(*self, Self::Finalizing { claim: held, .. } if held == claim)
    }

    /// `OPEN → FINALIZING`, or takeover of a claim older than `claim_ttl`.
    ///
    /// # Errors
    ///
    /// [`TransitionError::AlreadyClosed`] from `CLOSED`,
    /// [`TransitionError::InProgress`] while a live claim exists.
    pub fn claim(
        &self,
        claim: ClaimToken,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> Result<Self, TransitionError> {
        match *self {
            Self::Open => Ok(Self::Finalizing {
                claim,
                claimed_at: now,
            }),
            Self::Finalizing { claimed_at, .. } if claimed_at + claim_ttl <= now => {
                Ok(Self::Finalizing {
                    claim,
                    claimed_at: now,
                })
            }
            Self::Finalizing { claimed_at, .. } => Err(TransitionError::InProgress { claimed_at }),
            Self::Closed { closed_at } => Err(TransitionError::AlreadyClosed { closed_at }),
        }
    }

    /// `FINALIZING → OPEN` for the holder of `claim`.
    ///
    /// # Errors
    ///
    /// [`TransitionError::ClaimLost`] when `claim` is not the live claim,
    /// [`TransitionError::AlreadyClosed`] from `CLOSED`.
    pub fn release(&self, claim: ClaimToken) -> Result<Self, TransitionError> {
        match *self {
            Self::Finalizing { claim: held, .. } if held == claim => Ok(Self::Open),
            Self::Closed { closed_at } => Err(TransitionError::AlreadyClosed { closed_at }),
            Self::Open | Self::Finalizing { .. } => Err(TransitionError::ClaimLost { claim }),
        }
    }

    /// `FINALIZING → CLOSED` for the holder of `claim`.
    ///
    /// # Errors
    ///
    /// [`TransitionError::ClaimLost`] when `claim` is not the live claim,
    /// [`TransitionError::AlreadyClosed`] from `CLOSED`.
    pub fn close(&self, claim: ClaimToken, closed_at: DateTime<Utc>) -> Result<Self, TransitionError> {
        match *self {
            Self::Finalizing { claim: held, .. } if held == claim => Ok(Self::Closed { closed_at }),
            Self::Closed { closed_at } => Err(TransitionError::AlreadyClosed { closed_at }),
            Self::Open | Self::Finalizing { .. } => Err(TransitionError::ClaimLost { claim }),
        }
    }
}
