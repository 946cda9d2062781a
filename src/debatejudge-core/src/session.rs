//! Debate session controller.
//!
//! A [`Session`] is the single source of truth for a debate's lifecycle:
//!
//! ```text
//! Preparing ──start──▶ Ongoing ──pause──▶ Paused
//!     │                 ▲  │                │
//!     │                 └──┼────resume──────┘
//!     └──────end───────────┴──end──▶ Finished ◀──end── Paused
//! ```
//!
//! All control operations are serialized behind one mutex and read the clock
//! exactly once. Observers are notified synchronously, in order, before the
//! operation returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::DebateError;

/// Rounds used when the caller does not specify any.
pub const DEFAULT_TOTAL_ROUNDS: u32 = 3;

/// Externally visible lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Preparing,
    Ongoing,
    Paused,
    Finished,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "preparing"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Paused => write!(f, "paused"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Lifecycle phase together with exactly the timestamps valid in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preparing,
    Ongoing {
        started_at: Timestamp,
    },
    Paused {
        started_at: Timestamp,
        paused_at: Timestamp,
    },
    /// `started_at` is absent when the session was ended before it started.
    Finished {
        started_at: Option<Timestamp>,
        ended_at: Timestamp,
    },
}

/// Snapshot of a session's temporal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    phase: Phase,
    current_round: u32,
    total_rounds: u32,
    total_paused_ms: u64,
}

impl SessionState {
    fn new(total_rounds: u32) -> Self {
        Self {
            phase: Phase::Preparing,
            current_round: 0,
            total_rounds,
            total_paused_ms: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.phase {
            Phase::Preparing => SessionStatus::Preparing,
            Phase::Ongoing { .. } => SessionStatus::Ongoing,
            Phase::Paused { .. } => SessionStatus::Paused,
            Phase::Finished { .. } => SessionStatus::Finished,
        }
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        match self.phase {
            Phase::Preparing => None,
            Phase::Ongoing { started_at } | Phase::Paused { started_at, .. } => Some(started_at),
            Phase::Finished { started_at, .. } => started_at,
        }
    }

    pub fn ended_at(&self) -> Option<Timestamp> {
        match self.phase {
            Phase::Finished { ended_at, .. } => Some(ended_at),
            _ => None,
        }
    }

    pub fn paused_at(&self) -> Option<Timestamp> {
        match self.phase {
            Phase::Paused { paused_at, .. } => Some(paused_at),
            _ => None,
        }
    }

    pub fn total_paused_duration(&self) -> Duration {
        Duration::from_millis(self.total_paused_ms)
    }

    /// Active (unpaused) time between start and `now`, or the end if finished.
    ///
    /// While paused the clock is considered stopped at `paused_at`.
    pub fn elapsed_active_at(&self, now: Timestamp) -> Duration {
        let (started_at, until) = match self.phase {
            Phase::Preparing => return Duration::ZERO,
            Phase::Ongoing { started_at } => (started_at, now),
            Phase::Paused {
                started_at,
                paused_at,
            } => (started_at, paused_at),
            Phase::Finished {
                started_at: None, ..
            } => return Duration::ZERO,
            Phase::Finished {
                started_at: Some(started_at),
                ended_at,
            } => (started_at, ended_at),
        };

        let span = until.millis_since(started_at);
        match span.checked_sub(self.total_paused_ms) {
            Some(active) => Duration::from_millis(active),
            None => {
                error!(
                    span_ms = span,
                    paused_ms = self.total_paused_ms,
                    "paused time exceeds session span; clamping elapsed time to zero"
                );
                Duration::ZERO
            }
        }
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {}/{} | paused {}ms",
            self.status(),
            self.current_round,
            self.total_rounds,
            self.total_paused_ms
        )
    }
}

/// Notification emitted after a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    RoundChanged(u32),
}

/// Observer of session transitions.
///
/// Observers run while the session is locked and must not call back into it.
pub type SessionObserver = Box<dyn Fn(&SessionEvent) + Send + Sync>;

struct Inner {
    state: SessionState,
    observers: Vec<SessionObserver>,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        for observer in &self.observers {
            observer(&event);
        }
    }
}

/// One debate's lifecycle controller.
pub struct Session {
    id: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl Session {
    /// Create a session with `total_rounds` (default 3) on the system clock.
    pub fn new(total_rounds: Option<u32>) -> Result<Self, DebateError> {
        let total_rounds = total_rounds.unwrap_or(DEFAULT_TOTAL_ROUNDS);
        if total_rounds == 0 {
            return Err(DebateError::InvalidConfig(
                "a debate needs at least one round".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            clock: Arc::new(SystemClock::new()),
            inner: Mutex::new(Inner {
                state: SessionState::new(total_rounds),
                observers: Vec::new(),
            }),
        })
    }

    /// Use a different time source. Intended to be called before `start`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register an observer at construction time.
    pub fn with_observer(self, observer: SessionObserver) -> Self {
        self.subscribe(observer);
        self
    }

    /// Register an observer; it sees every later transition.
    pub fn subscribe(&self, observer: SessionObserver) {
        self.lock().observers.push(observer);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin the debate: `Preparing → Ongoing`, round 1.
    pub fn start(&self) -> Result<(), DebateError> {
        let mut inner = self.lock();
        if inner.state.phase != Phase::Preparing {
            return Err(DebateError::InvalidTransition {
                operation: "start",
                from: inner.state.status(),
            });
        }

        let now = self.clock.now();
        inner.state.phase = Phase::Ongoing { started_at: now };
        inner.state.current_round = 1;
        info!(session = %self.id, at = %now, "debate started");

        inner.emit(SessionEvent::StatusChanged(SessionStatus::Ongoing));
        inner.emit(SessionEvent::RoundChanged(1));
        Ok(())
    }

    /// `Ongoing → Paused`. Returns `false` and does nothing in any other state.
    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        let Phase::Ongoing { started_at } = inner.state.phase else {
            debug!(session = %self.id, status = %inner.state.status(), "ignoring pause");
            return false;
        };

        let now = self.clock.now();
        inner.state.phase = Phase::Paused {
            started_at,
            paused_at: now,
        };
        info!(session = %self.id, at = %now, "debate paused");

        inner.emit(SessionEvent::StatusChanged(SessionStatus::Paused));
        true
    }

    /// `Paused → Ongoing`, accumulating the pause. Returns `false` and does
    /// nothing in any other state.
    pub fn resume(&self) -> bool {
        let mut inner = self.lock();
        let Phase::Paused {
            started_at,
            paused_at,
        } = inner.state.phase
        else {
            debug!(session = %self.id, status = %inner.state.status(), "ignoring resume");
            return false;
        };

        let now = self.clock.now();
        let delta = now.millis_since(paused_at);
        inner.state.total_paused_ms += delta;
        inner.state.phase = Phase::Ongoing { started_at };
        info!(session = %self.id, at = %now, paused_ms = delta, "debate resumed");

        inner.emit(SessionEvent::StatusChanged(SessionStatus::Ongoing));
        true
    }

    /// Finish the debate from any state but `Finished`.
    pub fn end(&self) -> Result<(), DebateError> {
        let mut inner = self.lock();
        let started_at = inner.state.started_at();
        if inner.state.status() == SessionStatus::Finished {
            return Err(DebateError::InvalidTransition {
                operation: "end",
                from: SessionStatus::Finished,
            });
        }

        let now = self.clock.now();
        inner.state.phase = Phase::Finished {
            started_at,
            ended_at: now,
        };
        info!(
            session = %self.id,
            at = %now,
            round = inner.state.current_round,
            "debate finished"
        );

        inner.emit(SessionEvent::StatusChanged(SessionStatus::Finished));
        Ok(())
    }

    /// Move to the next round. Only legal while `Ongoing`.
    pub fn advance_round(&self) -> Result<u32, DebateError> {
        let mut inner = self.lock();
        let status = inner.state.status();
        if status != SessionStatus::Ongoing {
            return Err(DebateError::InvalidTransition {
                operation: "advance",
                from: status,
            });
        }
        if inner.state.current_round >= inner.state.total_rounds {
            return Err(DebateError::RoundLimitExceeded {
                total_rounds: inner.state.total_rounds,
            });
        }

        inner.state.current_round += 1;
        let round = inner.state.current_round;
        info!(session = %self.id, round, "advanced round");

        inner.emit(SessionEvent::RoundChanged(round));
        Ok(round)
    }

    /// Active time so far, excluding pauses.
    pub fn elapsed_active_duration(&self) -> Duration {
        let inner = self.lock();
        inner.state.elapsed_active_at(self.clock.now())
    }

    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Ongoing
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().state.status()
    }

    pub fn current_round(&self) -> u32 {
        self.lock().state.current_round
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// The current round, if the session is `Ongoing`.
    pub fn require_active(&self, operation: &'static str) -> Result<u32, DebateError> {
        let inner = self.lock();
        match inner.state.phase {
            Phase::Ongoing { .. } => Ok(inner.state.current_round),
            _ => Err(DebateError::InvalidTransition {
                operation,
                from: inner.state.status(),
            }),
        }
    }

    /// Run `apply` under the session lock if `guard` accepts the current
    /// state. Used to record provider results atomically with respect to
    /// control operations. Returns whether `apply` ran.
    pub fn apply_if(
        &self,
        guard: impl FnOnce(&SessionState) -> bool,
        apply: impl FnOnce(),
    ) -> bool {
        let inner = self.lock();
        if guard(&inner.state) {
            apply();
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.snapshot())
            .finish()
    }
}
