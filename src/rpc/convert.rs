// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::fleet_v1::{command_payload::Kind as ProtoKind, CommandPayload, RobotInfo};
use crate::command::{CommandKind, NavGoal, Velocity};
use crate::robot::RobotSnapshot;

impl From<&RobotSnapshot> for RobotInfo {
    fn from(snapshot: &RobotSnapshot) -> Self {
        Self {
            robot_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            vendor: snapshot.vendor.clone(),
            model: snapshot.model.clone(),
            state: snapshot.state.as_str().to_string(),
            battery: snapshot.battery,
            x: snapshot.pose.x,
            y: snapshot.pose.y,
            theta: snapshot.pose.theta,
            online: snapshot.online,
            mission_id: snapshot.mission_id.clone(),
            last_seen_ms: snapshot.last_seen_ms,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("command payload missing a `kind` variant")]
pub struct MissingCommandKind;

pub fn command_kind_from_proto(payload: CommandPayload) -> Result<CommandKind, MissingCommandKind> {
    match payload.kind.ok_or(MissingCommandKind)? {
        ProtoKind::Velocity(v) => Ok(CommandKind::Velocity(Velocity { linear_x: v.linear_x, linear_y: v.linear_y, angular_z: v.angular_z })),
        ProtoKind::NavGoal(g) => Ok(CommandKind::NavigationGoal(NavGoal { x: g.x, y: g.y, theta: g.theta })),
        ProtoKind::NavCancel(_) => Ok(CommandKind::NavigationCancel),
        ProtoKind::Estop(e) => Ok(CommandKind::EmergencyStop { activate: e.activate, reason: Some(e.reason).filter(|r| !r.is_empty()) }),
        ProtoKind::OpLock(l) => Ok(CommandKind::OperationLock { ttl_sec: l.ttl_sec as u64 }),
        ProtoKind::OpUnlock(_) => Ok(CommandKind::OperationUnlock),
    }
}
