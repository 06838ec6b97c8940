// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forwarder flush-loop behavior above the buffer-level unit tests in
//! `src/forwarder/mod.rs`: final flush on shutdown, and requeue when the
//! downstream recorder is unreachable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_gateway::forwarder::{run_flush_loop, CommandRecord, Forwarder};
use fleet_gateway::command::{Command, CommandKind, Velocity};
use fleet_gateway::robot::Role;
use fleet_gateway::robot::types::SensorRecord;
use tokio_util::sync::CancellationToken;

fn sensor(robot_id: &str) -> SensorRecord {
    SensorRecord {
        robot_id: robot_id.to_string(),
        topic: "pose".to_string(),
        data_type: "pose".to_string(),
        frame_id: "map".to_string(),
        source_ts_ms: 0,
        fields: HashMap::new(),
    }
}

#[tokio::test]
async fn cancel_triggers_final_flush_attempt_and_requeues_on_unreachable_recorder() {
    // Port 1 is reserved and nothing listens there, so the lazily-connected
    // client's flush RPC fails fast rather than hanging for the 5s deadline.
    let forwarder = Arc::new(Forwarder::new(10, "127.0.0.1:1"));
    forwarder.add_sensor(sensor("r1"));
    let cmd = Command::new("r1", CommandKind::Velocity(Velocity { linear_x: 0.1, linear_y: 0.0, angular_z: 0.0 }), "userA", Role::Operator);
    forwarder.add_command(CommandRecord::approved(&cmd));

    let cancel = CancellationToken::new();
    let loop_forwarder = forwarder.clone();
    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(run_flush_loop(loop_forwarder, loop_cancel));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle).await.expect("flush loop exits promptly on cancel").expect("task did not panic");

    // The RPC failed (nothing listening on 127.0.0.1:1), so both buffers
    // were drained then requeued rather than silently dropped.
    assert_eq!(forwarder.sensor_len(), 1);
    assert_eq!(forwarder.command_len(), 1);
}

#[tokio::test]
async fn flush_all_is_a_noop_on_empty_buffers() {
    let forwarder = Forwarder::new(10, "127.0.0.1:1");
    forwarder.flush_all().await;
    assert_eq!(forwarder.sensor_len(), 0);
    assert_eq!(forwarder.command_len(), 0);
}
