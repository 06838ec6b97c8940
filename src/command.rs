// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Command` data model shared by the session layer, safety pipeline,
//! adapters and forwarder (spec.md §3 "Command").

use serde::{Deserialize, Serialize};

use crate::robot::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub linear_x: f64,
    pub linear_y: f64,
    pub angular_z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavGoal {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CommandKind {
    Velocity(Velocity),
    NavigationGoal(NavGoal),
    NavigationCancel,
    EmergencyStop { activate: bool, reason: Option<String> },
    OperationLock { ttl_sec: u64 },
    OperationUnlock,
}

impl CommandKind {
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::Velocity(_) => "velocity_cmd",
            Self::NavigationGoal(_) => "nav_goal",
            Self::NavigationCancel => "nav_cancel",
            Self::EmergencyStop { .. } => "estop",
            Self::OperationLock { .. } => "op_lock",
            Self::OperationUnlock => "op_unlock",
        }
    }

    pub fn is_actuation(&self) -> bool {
        matches!(self, Self::Velocity(_) | Self::NavigationGoal(_) | Self::NavigationCancel)
    }
}

/// A command in flight through the safety pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: String,
    pub robot_id: String,
    pub kind: CommandKind,
    pub user_id: String,
    pub role: Role,
    pub ingress_ts_ms: i64,
    /// Set by the Velocity Limiter stage when any component was clamped.
    pub clamped: bool,
    /// Set by the Operation Lock stage when an admin bypassed a foreign
    /// lock (the `LOCK_OVERRIDE` audit flag in spec.md §4.4).
    pub lock_override: bool,
}

impl Command {
    pub fn new(robot_id: impl Into<String>, kind: CommandKind, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            command_id: uuid::Uuid::new_v4().to_string(),
            robot_id: robot_id.into(),
            kind,
            user_id: user_id.into(),
            role,
            ingress_ts_ms: crate::time::wall_now_ms(),
            clamped: false,
            lock_override: false,
        }
    }
}
