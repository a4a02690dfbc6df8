use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::error::UnlockError;

/// The last peripheral we successfully bound to.
///
/// `address` is the identity key. `display_name` is only used to confirm
/// that the radio still sees the same device behind that address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralIdentity {
    pub address: String,
    pub display_name: String,
}

impl PeripheralIdentity {
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
        }
    }
}

/// Validated lock configuration, read once at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    pub target_name: String,
    pub service_id: Uuid,
    pub command_characteristic_id: Uuid,
    pub press_duration_ms: u64,
    pub release_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    Resolving,
    Connecting,
    DiscoveringServices,
    Writing,
    Completing,
    Failed,
}

impl SessionPhase {
    /// Whether the state machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Connecting)
                | (Connecting, DiscoveringServices)
                | (DiscoveringServices, Writing)
                | (Writing, Completing)
                | (Completing, Idle)
                | (Failed, Idle)
        ) || (next == Failed && !matches!(self, Idle | Failed))
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::DiscoveringServices => "discovering services",
            Self::Writing => "writing",
            Self::Completing => "completing",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    PhaseChanged(SessionPhase),
    /// `true` while the door is being held open after a successful write.
    LockStateChanged(bool),
    SessionFinished(Result<(), UnlockError>),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
