// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end safety-pipeline scenarios from spec.md §8 that need more than
//! one module in play: the watchdog sweep actually injecting a command, and
//! a heartbeat timeout releasing an operation lock.

use std::sync::Arc;
use std::time::Duration;

use fleet_gateway::command::{Command, CommandKind, Velocity};
use fleet_gateway::robot::{Capabilities, Role, RobotManager};
use fleet_gateway::safety::SafetyPipeline;

#[tokio::test(start_paused = true)]
async fn watchdog_sweep_injects_synthetic_zero_velocity_for_stale_command() {
    let pipeline = Arc::new(SafetyPipeline::new());

    let moving = Command::new("r1", CommandKind::Velocity(Velocity { linear_x: 0.5, linear_y: 0.0, angular_z: 0.0 }), "userA", Role::Operator);
    let outcome = pipeline.run(moving, 1.0, 2.0, Duration::from_secs(300));
    assert!(matches!(outcome, fleet_gateway::safety::PipelineOutcome::Approved { .. }));

    let injected: Arc<std::sync::Mutex<Vec<Command>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = injected.clone();
    let send_to_adapter: Arc<dyn Fn(Command) + Send + Sync> = Arc::new(move |command| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(command);
    });

    let cancel = tokio_util::sync::CancellationToken::new();
    let cancel_inner = cancel.clone();
    let pipeline_inner = pipeline.clone();
    let handle = tokio::spawn(async move {
        fleet_gateway::safety::watchdog::run(
            pipeline_inner,
            send_to_adapter,
            Duration::from_millis(50),
            Duration::from_millis(100),
            cancel_inner,
        )
        .await;
    });

    tokio::time::advance(Duration::from_millis(250)).await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    let captured = injected.lock().unwrap_or_else(|e| e.into_inner());
    assert!(!captured.is_empty());
    let synthetic = &captured[0];
    assert_eq!(synthetic.user_id, "watchdog");
    match &synthetic.kind {
        CommandKind::Velocity(v) => assert_eq!((v.linear_x, v.linear_y, v.angular_z), (0.0, 0.0, 0.0)),
        other => panic!("expected velocity command, got {other:?}"),
    }
}

#[tokio::test]
async fn estop_active_during_watchdog_sweep_suppresses_synthetic_command() {
    let pipeline = Arc::new(SafetyPipeline::new());
    pipeline.watchdog.record("r1", Velocity { linear_x: 0.5, linear_y: 0.0, angular_z: 0.0 });
    pipeline.estop.activate_robot("r1", "admin", None);

    let injected: Arc<std::sync::Mutex<Vec<Command>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = injected.clone();
    let send_to_adapter: Arc<dyn Fn(Command) + Send + Sync> = Arc::new(move |command| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(command);
    });

    let cancel = tokio_util::sync::CancellationToken::new();
    let cancel_inner = cancel.clone();
    let pipeline_inner = pipeline.clone();
    let handle = tokio::spawn(async move {
        fleet_gateway::safety::watchdog::run(pipeline_inner, send_to_adapter, Duration::from_millis(5), Duration::from_millis(1), cancel_inner).await;
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert!(injected.lock().unwrap_or_else(|e| e.into_inner()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_force_releases_operation_lock() {
    let manager = RobotManager::new();
    manager.register("r1", "Bot", "acme", "m1", Capabilities::default()).await;

    let pipeline = SafetyPipeline::new();
    let lock_cmd = Command::new("r1", CommandKind::OperationLock { ttl_sec: 3600 }, "userA", Role::Operator);
    let outcome = pipeline.run(lock_cmd, 1.0, 2.0, Duration::from_secs(300));
    assert!(matches!(outcome, fleet_gateway::safety::PipelineOutcome::Approved { .. }));
    assert_eq!(pipeline.locks.holder_of("r1").as_deref(), Some("userA"));

    tokio::time::advance(Duration::from_secs(120)).await;
    let offline = manager.check_timeouts(Duration::from_secs(60)).await;
    assert_eq!(offline, vec!["r1".to_string()]);

    for robot_id in &offline {
        pipeline.locks.force_release(robot_id);
    }
    assert!(pipeline.locks.holder_of("r1").is_none());

    // A lock acquire from a different user now succeeds, since the prior
    // holder's lock was force-released rather than merely expired.
    let reacquire = Command::new("r1", CommandKind::OperationLock { ttl_sec: 300 }, "userB", Role::Operator);
    let outcome = pipeline.run(reacquire, 1.0, 2.0, Duration::from_secs(300));
    assert!(matches!(outcome, fleet_gateway::safety::PipelineOutcome::Approved { .. }));
}
