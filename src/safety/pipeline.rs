// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrates the mandatory four-stage chain (spec.md §4.4), invoked
//! synchronously by the session layer and the RPC command handler for
//! every actuation or control command.

use std::time::Duration;

use tracing::{info, warn};

use super::estop::EstopRegistry;
use super::lock::{LockRegistry, LockVerdict};
use super::limiter;
use super::watchdog::WatchdogState;
use crate::command::{Command, CommandKind};
use crate::error::ErrorCode;

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Approved { command: Command },
    Rejected { code: ErrorCode, message: String },
}

pub struct SafetyPipeline {
    pub estop: EstopRegistry,
    pub locks: LockRegistry,
    pub watchdog: WatchdogState,
}

impl Default for SafetyPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyPipeline {
    pub fn new() -> Self {
        Self { estop: EstopRegistry::new(), locks: LockRegistry::new(), watchdog: WatchdogState::new() }
    }

    /// Runs `command` through the four stages in order. `max_linear` /
    /// `max_angular` are the effective per-robot clamps (capability
    /// override already resolved by the caller); `lock_ttl` is the default
    /// used when an `op_lock` command requests ttl_sec=0.
    pub fn run(&self, mut command: Command, max_linear: f64, max_angular: f64, lock_ttl: Duration) -> PipelineOutcome {
        // Stage 1: E-Stop check.
        if let CommandKind::EmergencyStop { activate, reason } = &command.kind {
            if *activate {
                self.estop.activate_robot(&command.robot_id, &command.user_id, reason.clone());
                warn!(robot_id = %command.robot_id, user_id = %command.user_id, "e-stop activated");
            } else {
                self.estop.release_robot(&command.robot_id);
                info!(robot_id = %command.robot_id, user_id = %command.user_id, "e-stop released");
            }
            return PipelineOutcome::Approved { command };
        }
        if self.estop.is_active(&command.robot_id) {
            return PipelineOutcome::Rejected {
                code: ErrorCode::EstopActive,
                message: format!("e-stop active for robot {}", command.robot_id),
            };
        }

        // Stage 2: Operation lock.
        match &command.kind {
            CommandKind::OperationLock { ttl_sec } => {
                let ttl = if *ttl_sec > 0 { Duration::from_secs(*ttl_sec) } else { lock_ttl };
                return match self.locks.acquire(&command.robot_id, &command.user_id, command.role, ttl) {
                    Ok(()) => PipelineOutcome::Approved { command },
                    Err(_) => PipelineOutcome::Rejected {
                        code: ErrorCode::LockedByOther,
                        message: format!("robot {} already locked", command.robot_id),
                    },
                };
            }
            CommandKind::OperationUnlock => {
                return match self.locks.release(&command.robot_id, &command.user_id, command.role) {
                    Ok(()) => PipelineOutcome::Approved { command },
                    Err(_) => PipelineOutcome::Rejected {
                        code: ErrorCode::LockedByOther,
                        message: "lock not held by this session".to_string(),
                    },
                };
            }
            CommandKind::Velocity(_) | CommandKind::NavigationGoal(_) | CommandKind::NavigationCancel => {
                match self.locks.check(&command.robot_id, &command.user_id, command.role) {
                    LockVerdict::LockedByOther => {
                        return PipelineOutcome::Rejected {
                            code: ErrorCode::LockedByOther,
                            message: format!("robot {} locked by another user", command.robot_id),
                        };
                    }
                    LockVerdict::OverriddenByAdmin => {
                        command.lock_override = true;
                        warn!(robot_id = %command.robot_id, user_id = %command.user_id, "LOCK_OVERRIDE by admin");
                    }
                    LockVerdict::Unlocked | LockVerdict::OwnedByCaller => {}
                }
            }
            CommandKind::EmergencyStop { .. } => unreachable!("handled in stage 1"),
        }

        // Stage 3: Velocity limiter (never rejects).
        if let CommandKind::Velocity(velocity) = &command.kind {
            let (clamped_velocity, was_clamped) = limiter::clamp(velocity, max_linear, max_angular);
            command.clamped = was_clamped;
            command.kind = CommandKind::Velocity(clamped_velocity.clone());
            if was_clamped {
                warn!(robot_id = %command.robot_id, "velocity clamped to safety limits");
            }

            // Stage 4: Timeout watchdog bookkeeping.
            self.watchdog.record(&command.robot_id, clamped_velocity);
        }

        PipelineOutcome::Approved { command }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, Velocity};
    use crate::robot::Role;

    fn velocity_cmd(robot: &str, user: &str, role: Role, linear_x: f64) -> Command {
        Command::new(
            robot,
            CommandKind::Velocity(Velocity { linear_x, linear_y: 0.0, angular_z: 0.0 }),
            user,
            role,
        )
    }

    #[test]
    fn clamp_scenario() {
        let pipeline = SafetyPipeline::new();
        let cmd = velocity_cmd("r1", "userA", Role::Operator, 2.5);
        let outcome = pipeline.run(cmd, 1.0, 2.0, Duration::from_secs(300));
        match outcome {
            PipelineOutcome::Approved { command } => {
                assert!(command.clamped);
                match command.kind {
                    CommandKind::Velocity(v) => assert_eq!(v.linear_x, 1.0),
                    _ => panic!("expected velocity"),
                }
            }
            PipelineOutcome::Rejected { .. } => panic!("expected approval"),
        }
    }

    #[test]
    fn estop_blocks_velocity() {
        let pipeline = SafetyPipeline::new();
        pipeline.estop.activate_robot("r1", "admin", None);
        let cmd = velocity_cmd("r1", "userA", Role::Operator, 0.1);
        let outcome = pipeline.run(cmd, 1.0, 2.0, Duration::from_secs(300));
        assert!(matches!(outcome, PipelineOutcome::Rejected { code: ErrorCode::EstopActive, .. }));
    }

    #[test]
    fn lock_enforcement_scenario() {
        let pipeline = SafetyPipeline::new();
        let acquire = Command::new("r1", CommandKind::OperationLock { ttl_sec: 300 }, "userA", Role::Operator);
        let outcome = pipeline.run(acquire, 1.0, 2.0, Duration::from_secs(300));
        assert!(matches!(outcome, PipelineOutcome::Approved { .. }));

        let foreign = velocity_cmd("r1", "userB", Role::Operator, 0.2);
        let outcome = pipeline.run(foreign, 1.0, 2.0, Duration::from_secs(300));
        assert!(matches!(outcome, PipelineOutcome::Rejected { code: ErrorCode::LockedByOther, .. }));

        let owner = velocity_cmd("r1", "userA", Role::Operator, 0.2);
        let outcome = pipeline.run(owner, 1.0, 2.0, Duration::from_secs(300));
        assert!(matches!(outcome, PipelineOutcome::Approved { .. }));
    }

    #[test]
    fn estop_activation_always_passes_stage_one() {
        let pipeline = SafetyPipeline::new();
        let cmd = Command::new(
            "r1",
            CommandKind::EmergencyStop { activate: true, reason: Some("panic button".into()) },
            "anyone",
            Role::Viewer,
        );
        let outcome = pipeline.run(cmd, 1.0, 2.0, Duration::from_secs(300));
        assert!(matches!(outcome, PipelineOutcome::Approved { .. }));
        assert!(pipeline.estop.is_active("r1"));
    }
}
