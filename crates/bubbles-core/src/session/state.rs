//! Session State Machine
//!
//! The lifecycle of one radio address, as a pure function from
//! `(state, input)` to `(new state, effects)`. The state is consumed by each
//! transition so a stale copy can never be acted on.
//!
//! ```text
//! Discovered → Connecting → RoleNegotiating → Exchanging → Active
//!                   ↑              ↓                           ↓
//!                   └──────── Disconnected ←───────────────────┘
//!                                  ↓
//!                               Exited
//! ```

use core::fmt;
use core::time::Duration;

use crate::config::BubblesConfig;
use crate::errors::SessionError;
use crate::session::timers::TimerKind;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// State Types
// ----------------------------------------------------------------------------

/// Which side opened the radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Seen in an advertisement, no link
    Discovered,
    /// Transport connect issued, or waiting out a backoff before the next one
    Connecting { attempt: u32, in_flight: bool },
    /// Link up, local presence not yet written
    RoleNegotiating {
        role: Role,
        presence_received: bool,
    },
    /// Local presence written, waiting for the peer's
    Exchanging { role: Role },
    /// Both presences exchanged; location and message traffic flows
    Active { role: Role, since: Timestamp },
    /// Link dropped after the peer's identity was learned
    Disconnected { since: Timestamp },
    /// Terminal
    Exited,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Discovered => "Discovered",
            SessionState::Connecting { .. } => "Connecting",
            SessionState::RoleNegotiating { .. } => "RoleNegotiating",
            SessionState::Exchanging { .. } => "Exchanging",
            SessionState::Active { .. } => "Active",
            SessionState::Disconnected { .. } => "Disconnected",
            SessionState::Exited => "Exited",
        }
    }

    /// A radio link to the peer is up
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            SessionState::RoleNegotiating { .. }
                | SessionState::Exchanging { .. }
                | SessionState::Active { .. }
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }

    pub fn is_exited(&self) -> bool {
        matches!(self, SessionState::Exited)
    }

    /// Not linked and not trying to be; a sighting may start a connect
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            SessionState::Discovered | SessionState::Disconnected { .. }
        )
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            SessionState::RoleNegotiating { role, .. }
            | SessionState::Exchanging { role }
            | SessionState::Active { role, .. } => Some(*role),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Inputs and Effects
// ----------------------------------------------------------------------------

/// Everything that can move a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Local policy decided this side initiates
    Pursue,
    /// A radio link came up; role follows from the current state
    LinkUp,
    ConnectFailed,
    /// Backoff elapsed
    RetryDue,
    /// Local presence reached the peer
    PresenceWritten,
    /// A valid presence from the peer was decoded and its identity bound
    PresenceBound,
    LinkLost,
    /// A write exhausted its retries
    WriteFailed,
    HandshakeExpired,
    /// Exit grace period elapsed without a link
    GraceExpired,
    /// Application stopped communications, or the session was merged away
    Stop,
}

impl fmt::Display for SessionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Work requested by a transition, applied by the owning `PeerSession`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    Connect,
    Disconnect,
    SendPresence,
    FlushQueue,
    DiscardQueue,
    ResetReassembly,
    Arm { timer: TimerKind, delay: Duration },
    Cancel(TimerKind),
    /// Re-arm the exit grace deadline for an unlinked session
    ScheduleExpiry,
    Activated,
    /// Left Active; the peer stays published but unreachable
    Deactivated,
}

/// Facts a transition needs besides the state itself
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub now: Timestamp,
    pub config: &'a BubblesConfig,
    /// The session has learned its peer's identity at some point
    pub bound: bool,
    /// When the session last lost its link, if it has not linked since
    pub unlinked_since: Option<Timestamp>,
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: SessionState,
    pub effects: Vec<SessionEffect>,
}

impl StateTransition {
    fn to(new_state: SessionState, effects: Vec<SessionEffect>) -> Self {
        Self { new_state, effects }
    }

    fn stay(state: SessionState) -> Self {
        Self::to(state, Vec::new())
    }
}

// ----------------------------------------------------------------------------
// Transitions
// ----------------------------------------------------------------------------

impl SessionState {
    /// Consume the state and compute the next one
    pub fn transition(
        self,
        input: SessionInput,
        ctx: TransitionContext<'_>,
    ) -> Result<StateTransition, SessionError> {
        use SessionEffect::*;
        use SessionInput as In;
        use SessionState as S;

        let transition = match (self, input) {
            (S::Exited, input) => {
                return Err(SessionError::InvalidTransition {
                    from: S::Exited.name().into(),
                    input: input.to_string(),
                })
            }

            // Stop wins from anywhere
            (state, In::Stop) => {
                let mut effects = vec![
                    Cancel(TimerKind::ConnectRetry),
                    Cancel(TimerKind::Handshake),
                    Cancel(TimerKind::KeepAlive),
                    Cancel(TimerKind::Reassembly),
                    Cancel(TimerKind::Expiry),
                    DiscardQueue,
                    ResetReassembly,
                ];
                if state.is_linked() || matches!(state, S::Connecting { in_flight: true, .. }) {
                    effects.insert(0, Disconnect);
                }
                if state.is_active() {
                    effects.push(Deactivated);
                }
                StateTransition::to(S::Exited, effects)
            }

            // Discovery and connect
            (S::Discovered, In::Pursue) | (S::Disconnected { .. }, In::Pursue) => {
                StateTransition::to(
                    S::Connecting {
                        attempt: 1,
                        in_flight: true,
                    },
                    vec![Connect],
                )
            }
            (state @ S::Connecting { .. }, In::Pursue) => StateTransition::stay(state),

            (S::Connecting { in_flight: true, .. }, In::LinkUp) => {
                Self::link_up(Role::Initiator, ctx)
            }
            // Inbound link while idle or backing off: the peer chose to connect to us
            (S::Discovered, In::LinkUp)
            | (S::Disconnected { .. }, In::LinkUp)
            | (S::Connecting { in_flight: false, .. }, In::LinkUp) => {
                Self::link_up(Role::Responder, ctx)
            }
            (state, In::LinkUp) if state.is_linked() => StateTransition::stay(state),

            (
                S::Connecting {
                    attempt,
                    in_flight: true,
                },
                In::ConnectFailed | In::LinkLost,
            ) => {
                if attempt < ctx.config.backoff.max_attempts {
                    StateTransition::to(
                        S::Connecting {
                            attempt,
                            in_flight: false,
                        },
                        vec![Arm {
                            timer: TimerKind::ConnectRetry,
                            delay: ctx.config.backoff.delay_for(attempt),
                        }],
                    )
                } else {
                    // Out of attempts; wait for a fresh sighting
                    StateTransition::to(Self::unlinked(ctx), vec![ScheduleExpiry])
                }
            }
            (
                S::Connecting {
                    attempt,
                    in_flight: false,
                },
                In::RetryDue,
            ) => StateTransition::to(
                S::Connecting {
                    attempt: attempt + 1,
                    in_flight: true,
                },
                vec![Connect],
            ),

            // Presence exchange
            (
                S::RoleNegotiating {
                    role,
                    presence_received,
                },
                In::PresenceWritten,
            ) => {
                if presence_received {
                    Self::activate(role, ctx)
                } else {
                    StateTransition::to(S::Exchanging { role }, Vec::new())
                }
            }
            (S::RoleNegotiating { role, .. }, In::PresenceBound) => StateTransition::to(
                S::RoleNegotiating {
                    role,
                    presence_received: true,
                },
                Vec::new(),
            ),
            (S::Exchanging { role }, In::PresenceBound) => Self::activate(role, ctx),
            (state @ S::Exchanging { .. }, In::PresenceWritten)
            | (state @ S::Active { .. }, In::PresenceWritten)
            | (state @ S::Active { .. }, In::PresenceBound) => StateTransition::stay(state),

            // Link loss
            (state, input @ (In::LinkLost | In::WriteFailed | In::HandshakeExpired))
                if state.is_linked() =>
            {
                let mut effects = Vec::with_capacity(6);
                // Our side of the link may still be open
                if input != In::LinkLost {
                    effects.push(Disconnect);
                }
                effects.extend([
                    Cancel(TimerKind::Handshake),
                    Cancel(TimerKind::KeepAlive),
                    ResetReassembly,
                    ScheduleExpiry,
                ]);
                if state.is_active() {
                    effects.push(Deactivated);
                }
                StateTransition::to(Self::unlinked(ctx), effects)
            }
            (state, In::LinkLost | In::WriteFailed)
                if state.is_idle() || matches!(state, S::Connecting { in_flight: false, .. }) =>
            {
                StateTransition::stay(state)
            }

            // Exit
            (S::Discovered, In::GraceExpired)
            | (S::Disconnected { .. }, In::GraceExpired)
            | (
                S::Connecting {
                    in_flight: false, ..
                },
                In::GraceExpired,
            ) => StateTransition::to(S::Exited, vec![DiscardQueue, ResetReassembly]),
            // A peer that never answers a connect still runs out of grace
            (
                S::Connecting {
                    in_flight: true, ..
                },
                In::GraceExpired,
            ) => StateTransition::to(S::Exited, vec![Disconnect, DiscardQueue, ResetReassembly]),

            (state, input) => {
                return Err(SessionError::InvalidTransition {
                    from: state.name().into(),
                    input: input.to_string(),
                })
            }
        };

        Ok(transition)
    }

    fn link_up(role: Role, ctx: TransitionContext<'_>) -> StateTransition {
        StateTransition::to(
            SessionState::RoleNegotiating {
                role,
                presence_received: false,
            },
            vec![
                SessionEffect::Cancel(TimerKind::ConnectRetry),
                SessionEffect::Cancel(TimerKind::Expiry),
                SessionEffect::SendPresence,
                SessionEffect::Arm {
                    timer: TimerKind::Handshake,
                    delay: ctx.config.session.handshake_timeout,
                },
            ],
        )
    }

    fn activate(role: Role, ctx: TransitionContext<'_>) -> StateTransition {
        StateTransition::to(
            SessionState::Active {
                role,
                since: ctx.now,
            },
            vec![
                SessionEffect::Cancel(TimerKind::Handshake),
                SessionEffect::Cancel(TimerKind::Expiry),
                SessionEffect::Arm {
                    timer: TimerKind::KeepAlive,
                    delay: ctx.config.session.keepalive_interval,
                },
                SessionEffect::Activated,
                SessionEffect::FlushQueue,
            ],
        )
    }

    fn unlinked(ctx: TransitionContext<'_>) -> SessionState {
        if ctx.bound {
            SessionState::Disconnected {
                since: ctx.unlinked_since.unwrap_or(ctx.now),
            }
        } else {
            SessionState::Discovered
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
