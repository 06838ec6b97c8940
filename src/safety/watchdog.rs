// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage 4 of the safety pipeline (spec.md §4.4 "Timeout Watchdog"). Stage
//! 4 itself just records ingress time and the delivered (post-clamp)
//! velocity; the periodic sweep that injects synthetic zero-velocity lives
//! in `run` below, spawned once from `main`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::{Command, CommandKind, Velocity};
use crate::robot::Role;
use crate::safety::pipeline::SafetyPipeline;

#[derive(Debug, Clone)]
struct LastVelocity {
    at: Instant,
    velocity: Velocity,
}

fn is_zero(v: &Velocity) -> bool {
    v.linear_x == 0.0 && v.linear_y == 0.0 && v.angular_z == 0.0
}

pub struct WatchdogState {
    last_velocity: DashMap<String, LastVelocity>,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogState {
    pub fn new() -> Self {
        Self { last_velocity: DashMap::new() }
    }

    pub fn record(&self, robot_id: &str, velocity: Velocity) {
        self.last_velocity.insert(robot_id.to_string(), LastVelocity { at: Instant::now(), velocity });
    }

    pub fn forget(&self, robot_id: &str) {
        self.last_velocity.remove(robot_id);
    }

    fn stale_nonzero_robots(&self, staleness: Duration) -> Vec<String> {
        let now = Instant::now();
        self.last_velocity
            .iter()
            .filter(|entry| {
                now.saturating_duration_since(entry.value().at) >= staleness && !is_zero(&entry.value().velocity)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// Fixed-period sweep (spec.md's 500 ms default tick, configurable). For
/// each robot whose last delivered velocity is stale and non-zero, and
/// whose E-Stop is not active, injects a synthetic zero-velocity command
/// that bypasses stage 1 only — E-Stop already halts actuation when active,
/// so no synthetic is needed there. Navigation goals are never touched.
pub async fn run(
    pipeline: Arc<SafetyPipeline>,
    send_to_adapter: Arc<dyn Fn(Command) + Send + Sync>,
    tick: Duration,
    staleness: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("watchdog loop cancelled");
                return;
            }
            _ = interval.tick() => {
                for robot_id in pipeline.watchdog.stale_nonzero_robots(staleness) {
                    if pipeline.estop.is_active(&robot_id) {
                        continue;
                    }
                    let zero = Velocity { linear_x: 0.0, linear_y: 0.0, angular_z: 0.0 };
                    let command = Command::new(robot_id.clone(), CommandKind::Velocity(zero.clone()), "watchdog", Role::Admin);
                    warn!(robot_id = %robot_id, "injecting synthetic zero-velocity, command flow stalled");
                    pipeline.watchdog.record(&robot_id, zero);
                    send_to_adapter(command);
                }
            }
        }
    }
}
