// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::fsm::RobotState;

/// What an adapter advertises about the robot it drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_velocity: bool,
    pub supports_navigation: bool,
    pub supports_estop: bool,
    pub supports_pause: bool,
    pub max_linear: f64,
    pub max_angular: f64,
    pub sensor_topics: Vec<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supports_velocity: true,
            supports_navigation: false,
            supports_estop: true,
            supports_pause: false,
            max_linear: 1.0,
            max_angular: 2.0,
            sensor_topics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Detached snapshot of a robot's catalog entry, returned by `Manager::get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotSnapshot {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub state: RobotState,
    pub battery: f64,
    pub pose: Pose,
    pub capabilities: Capabilities,
    pub online: bool,
    pub last_seen_ms: i64,
    pub mission_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Internal catalog entry. `last_seen` is a monotonic `Instant`; the
/// millisecond wall-clock value in snapshots is derived at read time.
#[derive(Debug, Clone)]
pub struct RobotEntry {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub state: RobotState,
    pub battery: f64,
    pub pose: Pose,
    pub capabilities: Capabilities,
    pub online: bool,
    pub last_seen: Instant,
    pub mission_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl RobotEntry {
    pub fn new(id: String, name: String, vendor: String, model: String, capabilities: Capabilities) -> Self {
        Self {
            id,
            name,
            vendor,
            model,
            state: RobotState::Idle,
            battery: 100.0,
            pose: Pose::default(),
            capabilities,
            online: true,
            last_seen: Instant::now(),
            mission_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn snapshot(&self, now: Instant, wall_now_ms: i64) -> RobotSnapshot {
        let age_ms = now.saturating_duration_since(self.last_seen).as_millis() as i64;
        RobotSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            state: self.state,
            battery: self.battery,
            pose: self.pose,
            capabilities: self.capabilities.clone(),
            online: self.online,
            last_seen_ms: wall_now_ms - age_ms,
            mission_id: self.mission_id.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// A sensor sample produced by an adapter (spec.md §3 "Sensor Record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorRecord {
    pub robot_id: String,
    pub topic: String,
    pub data_type: String,
    pub frame_id: String,
    pub source_ts_ms: i64,
    pub fields: HashMap<String, String>,
}

/// User roles recognized by the role guard table in spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }

    pub fn from_str_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "operator" => Self::Operator,
            _ => Self::Viewer,
        }
    }

    pub fn at_least(&self, min: Role) -> bool {
        *self >= min
    }
}
