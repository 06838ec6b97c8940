// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::fsm::RobotState;
use super::types::{Capabilities, Pose, RobotEntry, RobotSnapshot, SensorRecord};
use crate::error::IllegalTransition;

/// Owns the robot catalog under a single reader-preferring lock (spec.md §5).
/// `tokio::sync::RwLock` does not itself guarantee reader preference, but it
/// is the same primitive the teacher uses for its shared-state structures
/// (`MuxState`'s session table), so we follow suit rather than reach for a
/// third-party fair lock for a single-process gateway.
pub struct RobotManager {
    catalog: RwLock<HashMap<String, RobotEntry>>,
    sensor_store: RwLock<HashMap<(String, String), SensorRecord>>,
}

impl Default for RobotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotManager {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(HashMap::new()),
            sensor_store: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent: inserts with state=Idle, battery=100, online=true if
    /// absent; a second call for the same id is a no-op.
    pub async fn register(&self, id: &str, name: &str, vendor: &str, model: &str, capabilities: Capabilities) {
        let mut catalog = self.catalog.write().await;
        if catalog.contains_key(id) {
            return;
        }
        info!(robot_id = %id, vendor, model, "robot registered");
        catalog.insert(
            id.to_string(),
            RobotEntry::new(id.to_string(), name.to_string(), vendor.to_string(), model.to_string(), capabilities),
        );
    }

    pub async fn update_status(
        &self,
        id: &str,
        state: RobotState,
        battery: f64,
        pose: Pose,
    ) -> Result<(), IllegalTransition> {
        let mut catalog = self.catalog.write().await;
        let Some(entry) = catalog.get_mut(id) else {
            return Err(IllegalTransition { robot_id: id.to_string(), from: RobotState::Offline, to: state });
        };
        if !entry.state.can_transition(state) {
            warn!(robot_id = %id, from = %entry.state, to = %state, "rejected illegal transition");
            return Err(IllegalTransition { robot_id: id.to_string(), from: entry.state, to: state });
        }
        info!(robot_id = %id, from = %entry.state, to = %state, "robot transition");
        entry.state = state;
        entry.battery = battery.clamp(0.0, 100.0);
        entry.pose = pose;
        entry.online = true;
        entry.last_seen = Instant::now();
        Ok(())
    }

    /// Refreshes `last_seen`/`online` without an FSM transition. Called for
    /// every sensor record a robot's bridge task receives, so liveness
    /// tracking isn't tied to status-topic cadence alone (spec.md §4.3
    /// "update_status ... Refreshes last-seen").
    pub async fn touch(&self, id: &str) {
        let mut catalog = self.catalog.write().await;
        if let Some(entry) = catalog.get_mut(id) {
            entry.last_seen = Instant::now();
            entry.online = true;
        }
    }

    pub async fn get(&self, id: &str) -> Option<RobotSnapshot> {
        let catalog = self.catalog.read().await;
        let now = Instant::now();
        let wall_now_ms = crate::time::wall_now_ms();
        catalog.get(id).map(|entry| entry.snapshot(now, wall_now_ms))
    }

    pub async fn list(&self) -> Vec<RobotSnapshot> {
        let catalog = self.catalog.read().await;
        let now = Instant::now();
        let wall_now_ms = crate::time::wall_now_ms();
        catalog.values().map(|entry| entry.snapshot(now, wall_now_ms)).collect()
    }

    async fn force_transition(&self, id: &str, state: RobotState) -> Result<(), IllegalTransition> {
        let mut catalog = self.catalog.write().await;
        let Some(entry) = catalog.get_mut(id) else {
            return Err(IllegalTransition { robot_id: id.to_string(), from: RobotState::Offline, to: state });
        };
        if !entry.state.can_transition(state) {
            return Err(IllegalTransition { robot_id: id.to_string(), from: entry.state, to: state });
        }
        entry.state = state;
        entry.last_seen = Instant::now();
        Ok(())
    }

    pub async fn start_move(&self, id: &str) -> Result<(), IllegalTransition> {
        self.force_transition(id, RobotState::Moving).await
    }

    pub async fn stop(&self, id: &str) -> Result<(), IllegalTransition> {
        self.force_transition(id, RobotState::Idle).await
    }

    pub async fn pause(&self, id: &str) -> Result<(), PauseError> {
        let mut catalog = self.catalog.write().await;
        let Some(entry) = catalog.get_mut(id) else {
            return Err(PauseError::NotFound);
        };
        if !entry.capabilities.supports_pause {
            return Err(PauseError::Unsupported);
        }
        if !entry.state.can_transition(RobotState::Paused) {
            return Err(PauseError::Illegal(IllegalTransition { robot_id: id.to_string(), from: entry.state, to: RobotState::Paused }));
        }
        entry.state = RobotState::Paused;
        Ok(())
    }

    pub async fn resume(&self, id: &str) -> Result<(), IllegalTransition> {
        self.force_transition(id, RobotState::Moving).await
    }

    pub async fn set_mission(&self, id: &str, mission_id: Option<String>) -> bool {
        let mut catalog = self.catalog.write().await;
        match catalog.get_mut(id) {
            Some(entry) => {
                entry.mission_id = mission_id;
                true
            }
            None => false,
        }
    }

    /// Any online robot whose last-seen is older than `deadline` is marked
    /// Offline. Returns the ids that transitioned, so callers can release
    /// their operation locks; E-Stop state is intentionally untouched here.
    pub async fn check_timeouts(&self, deadline: Duration) -> Vec<String> {
        let mut catalog = self.catalog.write().await;
        let now = Instant::now();
        let mut went_offline = Vec::new();
        for entry in catalog.values_mut() {
            if entry.online && now.saturating_duration_since(entry.last_seen) >= deadline {
                warn!(robot_id = %entry.id, "heartbeat timeout, marking offline");
                entry.state = RobotState::Offline;
                entry.online = false;
                went_offline.push(entry.id.clone());
            }
        }
        went_offline
    }

    pub async fn mark_reconnected(&self, id: &str) -> Result<(), IllegalTransition> {
        let mut catalog = self.catalog.write().await;
        let Some(entry) = catalog.get_mut(id) else {
            return Err(IllegalTransition { robot_id: id.to_string(), from: RobotState::Offline, to: RobotState::Idle });
        };
        entry.state = RobotState::Idle;
        entry.online = true;
        entry.last_seen = Instant::now();
        Ok(())
    }

    pub async fn record_sensor(&self, record: SensorRecord) {
        let mut store = self.sensor_store.write().await;
        store.insert((record.robot_id.clone(), record.topic.clone()), record);
    }

    pub async fn latest_sensor(&self, robot_id: &str, topic: &str) -> Option<SensorRecord> {
        let store = self.sensor_store.read().await;
        store.get(&(robot_id.to_string(), topic.to_string())).cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PauseError {
    #[error("robot not found")]
    NotFound,
    #[error("robot does not support pause")]
    Unsupported,
    #[error(transparent)]
    Illegal(#[from] IllegalTransition),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities::default()
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let mgr = RobotManager::new();
        mgr.register("r1", "Bot", "acme", "m1", caps()).await;
        mgr.register("r1", "Renamed", "acme", "m1", caps()).await;
        let snap = mgr.get("r1").await.unwrap();
        assert_eq!(snap.name, "Bot");
    }

    #[tokio::test]
    async fn update_status_rejects_illegal_transition() {
        let mgr = RobotManager::new();
        mgr.register("r1", "Bot", "acme", "m1", caps()).await;
        let result = mgr.update_status("r1", RobotState::Paused, 90.0, Pose::default()).await;
        assert!(result.is_err());
        let snap = mgr.get("r1").await.unwrap();
        assert_eq!(snap.state, RobotState::Idle);
    }

    #[tokio::test]
    async fn update_status_allows_legal_transition() {
        let mgr = RobotManager::new();
        mgr.register("r1", "Bot", "acme", "m1", caps()).await;
        mgr.update_status("r1", RobotState::Moving, 90.0, Pose::default()).await.unwrap();
        let snap = mgr.get("r1").await.unwrap();
        assert_eq!(snap.state, RobotState::Moving);
    }

    #[tokio::test]
    async fn check_timeouts_marks_offline() {
        let mgr = RobotManager::new();
        mgr.register("r1", "Bot", "acme", "m1", caps()).await;
        tokio::time::pause();
        tokio::time::advance(Duration::from_millis(1100)).await;
        let offline = mgr.check_timeouts(Duration::from_millis(1000)).await;
        assert_eq!(offline, vec!["r1".to_string()]);
        let snap = mgr.get("r1").await.unwrap();
        assert!(!snap.online);
        assert_eq!(snap.state, RobotState::Offline);
    }

    #[tokio::test]
    async fn touch_refreshes_last_seen_without_changing_state() {
        let mgr = RobotManager::new();
        mgr.register("r1", "Bot", "acme", "m1", caps()).await;
        tokio::time::pause();
        tokio::time::advance(Duration::from_millis(2000)).await;
        mgr.touch("r1").await;
        let offline = mgr.check_timeouts(Duration::from_millis(1000)).await;
        assert!(offline.is_empty());
        let snap = mgr.get("r1").await.unwrap();
        assert_eq!(snap.state, RobotState::Idle);
        assert!(snap.online);
    }

    #[tokio::test]
    async fn pause_requires_capability() {
        let mgr = RobotManager::new();
        mgr.register("r1", "Bot", "acme", "m1", caps()).await;
        mgr.start_move("r1").await.unwrap();
        let err = mgr.pause("r1").await.unwrap_err();
        assert!(matches!(err, PauseError::Unsupported));
    }
}
