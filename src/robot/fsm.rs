// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Robot lifecycle states (spec.md §3 "Robot FSM").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobotState {
    Idle,
    Moving,
    Paused,
    Charging,
    Error,
    Offline,
}

impl RobotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Moving => "moving",
            Self::Paused => "paused",
            Self::Charging => "charging",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }

    /// Inverse of `as_str`, used to parse a status field out of an
    /// adapter-reported sensor record.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "moving" => Some(Self::Moving),
            "paused" => Some(Self::Paused),
            "charging" => Some(Self::Charging),
            "error" => Some(Self::Error),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    /// Any state may be forced into `Error` (safety override) or into
    /// `Offline` (heartbeat timeout). All other transitions follow the
    /// table in spec.md §3.
    pub fn can_transition(&self, to: RobotState) -> bool {
        use RobotState::*;
        if matches!(to, Error | Offline) {
            return true;
        }
        matches!(
            (self, to),
            (Idle, Moving)
                | (Idle, Charging)
                | (Moving, Idle)
                | (Moving, Paused)
                | (Paused, Moving)
                | (Paused, Idle)
                | (Charging, Idle)
                | (Error, Idle)
                | (Offline, Idle)
        )
    }
}

impl std::fmt::Display for RobotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_allows_moving_and_charging_and_error() {
        assert!(RobotState::Idle.can_transition(RobotState::Moving));
        assert!(RobotState::Idle.can_transition(RobotState::Charging));
        assert!(RobotState::Idle.can_transition(RobotState::Error));
        assert!(!RobotState::Idle.can_transition(RobotState::Paused));
    }

    #[test]
    fn any_state_can_go_offline_or_error() {
        for state in [
            RobotState::Idle,
            RobotState::Moving,
            RobotState::Paused,
            RobotState::Charging,
            RobotState::Error,
            RobotState::Offline,
        ] {
            assert!(state.can_transition(RobotState::Offline));
            assert!(state.can_transition(RobotState::Error));
        }
    }

    #[test]
    fn offline_only_returns_to_idle() {
        assert!(RobotState::Offline.can_transition(RobotState::Idle));
        assert!(!RobotState::Offline.can_transition(RobotState::Moving));
    }

    #[test]
    fn error_only_returns_to_idle() {
        assert!(RobotState::Error.can_transition(RobotState::Idle));
        assert!(!RobotState::Error.can_transition(RobotState::Moving));
    }

    #[test]
    fn charging_cannot_move_directly() {
        assert!(!RobotState::Charging.can_transition(RobotState::Moving));
        assert!(RobotState::Charging.can_transition(RobotState::Idle));
    }
}
