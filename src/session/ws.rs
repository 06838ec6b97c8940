// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket session lifecycle (spec.md §4.5): Accepted -> Authenticating
//! -> Authenticated -> Closing, dispatch table, keepalive. Correlation ids
//! for acks reuse the server-assigned command id, in the same spirit as
//! `WsBridge`'s request-id stamping.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{self, Envelope};
use crate::command::{Command, CommandKind, NavGoal, Velocity};
use crate::error::ErrorCode;
use crate::forwarder::CommandRecord;
use crate::robot::Role;
use crate::safety::PipelineOutcome;
use crate::session::queue::DropOldestQueue;
use crate::state::GatewayState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(20);
const MAX_MISSED_PONGS: u32 = 2;
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);
const SEND_DEADLINE: Duration = Duration::from_secs(2);
const ESTOP_DEADLINE: Duration = Duration::from_secs(1);
const SESSION_QUEUE_CAPACITY: usize = 256;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        run_session(socket, state, addr).await;
    })
}

#[derive(Debug, Deserialize)]
struct AuthPayload {
    token: String,
}

#[derive(Debug, Deserialize)]
struct VelocityPayload {
    linear_x: f64,
    #[serde(default)]
    linear_y: f64,
    angular_z: f64,
}

#[derive(Debug, Deserialize)]
struct NavGoalPayload {
    x: f64,
    y: f64,
    #[serde(default)]
    theta: f64,
}

#[derive(Debug, Deserialize)]
struct EstopPayload {
    activate: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LockPayload {
    #[serde(default)]
    ttl_sec: u64,
}

#[derive(Debug, Deserialize)]
struct SubscribePayload {
    robot_id: String,
    topic: String,
}

struct SessionCtx {
    id: String,
    user_id: String,
    role: Role,
    prefer_binary: bool,
}

async fn run_session(socket: WebSocket, state: Arc<GatewayState>, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let session_id = Uuid::new_v4().to_string();
    let cancel = state.shutdown.child_token();

    let auth_frame = match tokio::time::timeout(AUTH_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(message))) => message,
        _ => {
            send_close(&mut sink, 4401, "authentication timeout").await;
            return;
        }
    };

    let (envelope, prefer_binary) = match parse_inbound(&auth_frame) {
        Some(parsed) => parsed,
        None => {
            send_close(&mut sink, 4401, "malformed auth frame").await;
            return;
        }
    };

    if envelope.kind != "auth" {
        send_close(&mut sink, 4401, "first frame must be auth").await;
        return;
    }

    let Some(authenticator) = &state.authenticator else {
        send_close(&mut sink, 4401, "authentication not configured").await;
        return;
    };

    let auth_payload: AuthPayload = match envelope.payload.and_then(|v| serde_json::from_value(v).ok()) {
        Some(payload) => payload,
        None => {
            send_close(&mut sink, 4401, "missing token").await;
            return;
        }
    };

    let user = match authenticator.verify(&auth_payload.token) {
        Ok(user) => user,
        Err(e) => {
            warn!(remote = %addr, error = %e, "auth rejected");
            send_close(&mut sink, 4401, "auth failed").await;
            return;
        }
    };

    let ctx = SessionCtx { id: session_id.clone(), user_id: user.user_id.clone(), role: user.role, prefer_binary };
    info!(session_id = %ctx.id, user_id = %ctx.user_id, role = %user.role.as_str(), remote = %addr, "session authenticated");

    let queue = Arc::new(DropOldestQueue::<Envelope>::new(SESSION_QUEUE_CAPACITY));
    let ack = Envelope::new("auth-ack").with_payload(json!({"user_id": ctx.user_id, "role": ctx.role.as_str()}));
    if let Ok(bytes) = codec::encode(&ack, ctx.prefer_binary) {
        let _ = sink.send(to_ws_message(bytes, ctx.prefer_binary)).await;
    }

    let mut missed_pongs: u32 = 0;
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.tick().await; // first tick fires immediately; discard

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %ctx.id, "session cancelled by shutdown");
                break;
            }
            _ = ping_timer.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    warn!(session_id = %ctx.id, "keepalive timeout, closing session");
                    break;
                }
                missed_pongs += 1;
                let ping = Envelope::new("ping");
                if send_envelope(&mut sink, &ping, ctx.prefer_binary).await.is_err() {
                    break;
                }
            }
            delivered = queue.recv() => {
                match delivered {
                    Some(envelope) => {
                        if send_envelope(&mut sink, &envelope, ctx.prefer_binary).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                if matches!(message, Message::Close(_)) {
                    break;
                }
                let Some((envelope, _)) = parse_inbound(&message) else {
                    let err = Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "malformed frame");
                    let _ = send_envelope(&mut sink, &err, ctx.prefer_binary).await;
                    continue;
                };
                if envelope.kind == "pong" {
                    missed_pongs = 0;
                    continue;
                }
                if let Some(reply) = dispatch(&state, &ctx, &queue, envelope).await {
                    if send_envelope(&mut sink, &reply, ctx.prefer_binary).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Closing: drain remaining queued telemetry with a short deadline, then
    // deregister subscriptions and (if configured) release held locks.
    let _ = tokio::time::timeout(DRAIN_DEADLINE, async {
        while let Some(envelope) = queue.recv().await {
            if send_envelope(&mut sink, &envelope, ctx.prefer_binary).await.is_err() {
                break;
            }
        }
    })
    .await;
    queue.close();
    state.hub.unsubscribe_all(&ctx.id);
    if state.config.release_locks_on_disconnect {
        for robot_id in state.registry.ids() {
            let _ = state.pipeline.locks.release(&robot_id, &ctx.user_id, ctx.role);
        }
    }
    info!(session_id = %ctx.id, "session closed");
}

fn parse_inbound(message: &Message) -> Option<(Envelope, bool)> {
    match message {
        Message::Binary(bytes) => codec::decode(bytes).ok().map(|e| (e, true)),
        Message::Text(text) => codec::decode(text.as_bytes()).ok().map(|e| (e, false)),
        _ => None,
    }
}

fn to_ws_message(bytes: Vec<u8>, binary: bool) -> Message {
    if binary {
        Message::Binary(bytes.into())
    } else {
        Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())
    }
}

async fn send_envelope(
    sink: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
    prefer_binary: bool,
) -> Result<(), axum::Error> {
    let Ok(bytes) = codec::encode(envelope, prefer_binary) else { return Ok(()) };
    tokio::time::timeout(SEND_DEADLINE, sink.send(to_ws_message(bytes, prefer_binary)))
        .await
        .unwrap_or(Ok(()))
}

async fn send_close(sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let err = Envelope::new("error").with_error(ErrorCode::AuthFailed.as_str(), reason);
    if let Ok(bytes) = codec::encode(&err, true) {
        let _ = sink.send(Message::Binary(bytes.into())).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
        .await;
}

fn require_role(ctx: &SessionCtx, min: Role) -> Result<(), Envelope> {
    if ctx.role.at_least(min) {
        Ok(())
    } else {
        Err(Envelope::new("error").with_error(ErrorCode::RoleDenied.as_str(), "insufficient role"))
    }
}

fn command_ack(command_id: &str, robot_id: &str, outcome: &PipelineOutcome) -> Envelope {
    match outcome {
        PipelineOutcome::Approved { command } => Envelope::new("command-ack")
            .with_robot_id(robot_id.to_string())
            .with_payload(json!({"command_id": command_id, "success": true, "clamped": command.clamped})),
        PipelineOutcome::Rejected { code, message } => Envelope::new("command-ack")
            .with_robot_id(robot_id.to_string())
            .with_payload(json!({"command_id": command_id, "success": false}))
            .with_error(code.as_str(), message.clone()),
    }
}

async fn dispatch(
    state: &Arc<GatewayState>,
    ctx: &SessionCtx,
    queue: &Arc<DropOldestQueue<Envelope>>,
    envelope: Envelope,
) -> Option<Envelope> {
    let payload = envelope.payload.clone().unwrap_or(Value::Null);
    if let Some(min) = crate::adapter::min_role_for(envelope.kind.as_str()) {
        if let Err(e) = require_role(ctx, min) {
            return Some(e);
        }
    }
    match envelope.kind.as_str() {
        "ping" => Some(Envelope::new("pong").with_payload(json!({"ts": envelope.ts}))),

        "velocity_cmd" => {
            let Some(robot_id) = envelope.robot_id.clone() else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "missing robot_id"));
            };
            let Ok(body) = serde_json::from_value::<VelocityPayload>(payload) else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "bad velocity payload"));
            };
            let velocity = Velocity { linear_x: body.linear_x, linear_y: body.linear_y, angular_z: body.angular_z };
            Some(run_actuation(state, ctx, &robot_id, CommandKind::Velocity(velocity)).await)
        }

        "nav_goal" => {
            let Some(robot_id) = envelope.robot_id.clone() else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "missing robot_id"));
            };
            let Ok(body) = serde_json::from_value::<NavGoalPayload>(payload) else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "bad nav_goal payload"));
            };
            let goal = NavGoal { x: body.x, y: body.y, theta: body.theta };
            Some(run_actuation(state, ctx, &robot_id, CommandKind::NavigationGoal(goal)).await)
        }

        "nav_cancel" => {
            let Some(robot_id) = envelope.robot_id.clone() else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "missing robot_id"));
            };
            Some(run_actuation(state, ctx, &robot_id, CommandKind::NavigationCancel).await)
        }

        "estop" => {
            let Ok(body) = serde_json::from_value::<EstopPayload>(payload) else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "bad estop payload"));
            };
            if !body.activate && !ctx.role.at_least(state.config.estop_release_role()) {
                return Some(Envelope::new("error").with_error(ErrorCode::RoleDenied.as_str(), "role may not release e-stop"));
            }
            match envelope.robot_id.clone() {
                Some(robot_id) => {
                    let command = Command::new(robot_id.clone(), CommandKind::EmergencyStop { activate: body.activate, reason: body.reason }, &ctx.user_id, ctx.role);
                    let command_id = command.command_id.clone();
                    let outcome = state.pipeline.run(command, state.config.max_linear_vel, state.config.max_angular_vel, state.config.lock_ttl());
                    if body.activate {
                        if let Some(adapter) = state.registry.get(&robot_id) {
                            if tokio::time::timeout(ESTOP_DEADLINE, adapter.emergency_stop()).await.is_err() {
                                warn!(robot_id = %robot_id, "adapter emergency_stop exceeded deadline");
                            }
                        }
                    }
                    if let PipelineOutcome::Approved { command } = &outcome {
                        state.forwarder.add_command(CommandRecord::approved(command));
                    }
                    Some(command_ack(&command_id, &robot_id, &outcome))
                }
                None => {
                    if !ctx.role.at_least(Role::Admin) {
                        return Some(Envelope::new("error").with_error(ErrorCode::RoleDenied.as_str(), "global e-stop requires admin role"));
                    }
                    if body.activate {
                        state.pipeline.estop.activate_global(&ctx.user_id, body.reason.clone());
                        warn!(user_id = %ctx.user_id, "global e-stop activated");
                    } else {
                        state.pipeline.estop.release_global();
                        info!(user_id = %ctx.user_id, "global e-stop released");
                    }
                    for robot_id in state.registry.ids() {
                        if body.activate {
                            if let Some(adapter) = state.registry.get(&robot_id) {
                                if tokio::time::timeout(ESTOP_DEADLINE, adapter.emergency_stop()).await.is_err() {
                                    warn!(robot_id = %robot_id, "adapter emergency_stop exceeded deadline");
                                }
                            }
                            let reason = body.reason.clone().unwrap_or_else(|| "global e-stop".to_string());
                            state.hub.broadcast_safety_alert(&robot_id, &reason);
                        }
                    }
                    Some(Envelope::new("command-ack").with_payload(json!({"success": true, "scope": "global", "activate": body.activate})))
                }
            }
        }

        "op_lock" => {
            let Some(robot_id) = envelope.robot_id.clone() else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "missing robot_id"));
            };
            let ttl_sec = serde_json::from_value::<LockPayload>(payload).map(|p| p.ttl_sec).unwrap_or(0);
            let command = Command::new(robot_id.clone(), CommandKind::OperationLock { ttl_sec }, &ctx.user_id, ctx.role);
            let command_id = command.command_id.clone();
            let outcome = state.pipeline.run(command, state.config.max_linear_vel, state.config.max_angular_vel, state.config.lock_ttl());
            Some(command_ack(&command_id, &robot_id, &outcome))
        }

        "op_unlock" => {
            let Some(robot_id) = envelope.robot_id.clone() else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "missing robot_id"));
            };
            let command = Command::new(robot_id.clone(), CommandKind::OperationUnlock, &ctx.user_id, ctx.role);
            let command_id = command.command_id.clone();
            let outcome = state.pipeline.run(command, state.config.max_linear_vel, state.config.max_angular_vel, state.config.lock_ttl());
            Some(command_ack(&command_id, &robot_id, &outcome))
        }

        "subscribe" => {
            let Ok(body) = serde_json::from_value::<SubscribePayload>(payload) else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "bad subscribe payload"));
            };
            state.hub.subscribe(&body.robot_id, &body.topic, &ctx.id, queue.clone());
            None
        }

        "unsubscribe" => {
            let Ok(body) = serde_json::from_value::<SubscribePayload>(payload) else {
                return Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), "bad unsubscribe payload"));
            };
            state.hub.unsubscribe(&body.robot_id, &body.topic, &ctx.id);
            None
        }

        other => Some(Envelope::new("error").with_error(ErrorCode::BadRequest.as_str(), format!("unknown type {other}"))),
    }
}

async fn run_actuation(state: &Arc<GatewayState>, ctx: &SessionCtx, robot_id: &str, kind: CommandKind) -> Envelope {
    let Some(robot) = state.manager.get(robot_id).await else {
        return Envelope::new("command-ack")
            .with_robot_id(robot_id.to_string())
            .with_error(ErrorCode::RobotNotFound.as_str(), "robot not found");
    };
    let command = Command::new(robot_id, kind, &ctx.user_id, ctx.role);
    let command_id = command.command_id.clone();
    let outcome = state.pipeline.run(command, robot.capabilities.max_linear, robot.capabilities.max_angular, state.config.lock_ttl());

    let outcome = match outcome {
        PipelineOutcome::Approved { command } => {
            if command.clamped {
                state.hub.broadcast_safety_alert(robot_id, "velocity clamped to safety limits");
            }
            match state.registry.get(robot_id) {
                Some(adapter) => {
                    match tokio::time::timeout(Duration::from_secs(2), adapter.send_command(&command)).await {
                        Ok(Ok(())) => {
                            state.forwarder.add_command(CommandRecord::approved(&command));
                            PipelineOutcome::Approved { command }
                        }
                        _ => {
                            warn!(robot_id, "adapter send failed or timed out");
                            state.forwarder.add_command(CommandRecord::rejected(&command, ErrorCode::AdapterUnavailable.as_str()));
                            PipelineOutcome::Rejected { code: ErrorCode::AdapterUnavailable, message: "adapter unavailable".to_string() }
                        }
                    }
                }
                None => {
                    state.forwarder.add_command(CommandRecord::rejected(&command, ErrorCode::AdapterUnavailable.as_str()));
                    PipelineOutcome::Rejected { code: ErrorCode::AdapterUnavailable, message: "no adapter registered".to_string() }
                }
            }
        }
        rejected @ PipelineOutcome::Rejected { .. } => rejected,
    };

    command_ack(&command_id, robot_id, &outcome)
}
