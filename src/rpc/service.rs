// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane RPC surface (spec.md §4.8), grounded on
//! `crates/cli/src/transport/grpc/service.rs`'s shape: a thin tonic
//! service holding shared state by `Arc`, translating requests into the
//! same safety-pipeline path the WebSocket session layer uses.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::warn;

use super::convert::command_kind_from_proto;
use super::fleet_v1::fleet_gateway_server::FleetGateway;
use super::fleet_v1::{
    CancelMissionRequest, CancelMissionResponse, GetHealthRequest, GetHealthResponse, GetRobotRequest,
    ListRobotsRequest, ListRobotsResponse, RobotInfo, SendCommandRequest, SendCommandResponse, StartMissionRequest,
    StartMissionResponse, StreamRobotStatusRequest,
};
use crate::command::Command;
use crate::error::ErrorCode;
use crate::forwarder::CommandRecord;
use crate::robot::Role;
use crate::safety::PipelineOutcome;
use crate::state::GatewayState;

pub struct FleetGatewayService {
    state: Arc<GatewayState>,
}

impl FleetGatewayService {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl FleetGateway for FleetGatewayService {
    async fn list_robots(&self, _request: Request<ListRobotsRequest>) -> Result<Response<ListRobotsResponse>, Status> {
        let robots = self.state.manager.list().await.iter().map(RobotInfo::from).collect();
        Ok(Response::new(ListRobotsResponse { robots }))
    }

    async fn get_robot(&self, request: Request<GetRobotRequest>) -> Result<Response<RobotInfo>, Status> {
        let robot_id = request.into_inner().robot_id;
        let snapshot = self
            .state
            .manager
            .get(&robot_id)
            .await
            .ok_or_else(|| Status::not_found(format!("robot {robot_id} not found")))?;
        Ok(Response::new(RobotInfo::from(&snapshot)))
    }

    async fn send_command(&self, request: Request<SendCommandRequest>) -> Result<Response<SendCommandResponse>, Status> {
        let req = request.into_inner();
        let role = Role::from_str_lenient(&req.role);
        let Some(payload) = req.command else {
            return Err(Status::invalid_argument("missing command payload"));
        };
        let kind = command_kind_from_proto(payload).map_err(|e| Status::invalid_argument(e.to_string()))?;

        let Some(robot) = self.state.manager.get(&req.robot_id).await else {
            return Err(ErrorCode::RobotNotFound.to_grpc_status(format!("robot {} not found", req.robot_id)));
        };

        let command = Command::new(req.robot_id.clone(), kind, req.user_id.clone(), role);
        let command_id = command.command_id.clone();
        let outcome = self.state.pipeline.run(
            command,
            robot.capabilities.max_linear,
            robot.capabilities.max_angular,
            self.state.config.lock_ttl(),
        );

        let (success, code, message, clamped) = match outcome {
            PipelineOutcome::Approved { command } => {
                if command.clamped {
                    self.state.hub.broadcast_safety_alert(&req.robot_id, "velocity clamped to safety limits");
                }
                match self.state.registry.get(&req.robot_id) {
                    Some(adapter) => {
                        match tokio::time::timeout(Duration::from_secs(2), adapter.send_command(&command)).await {
                            Ok(Ok(())) => {
                                self.state.forwarder.add_command(CommandRecord::approved(&command));
                                (true, None, None, command.clamped)
                            }
                            _ => {
                                warn!(robot_id = %req.robot_id, "adapter send failed or timed out");
                                self.state.forwarder.add_command(CommandRecord::rejected(&command, ErrorCode::AdapterUnavailable.as_str()));
                                (false, Some(ErrorCode::AdapterUnavailable.as_str().to_string()), Some("adapter unavailable".to_string()), command.clamped)
                            }
                        }
                    }
                    None => {
                        self.state.forwarder.add_command(CommandRecord::rejected(&command, ErrorCode::AdapterUnavailable.as_str()));
                        (false, Some(ErrorCode::AdapterUnavailable.as_str().to_string()), Some("no adapter registered".to_string()), command.clamped)
                    }
                }
            }
            PipelineOutcome::Rejected { code, message } => (false, Some(code.as_str().to_string()), Some(message), false),
        };

        Ok(Response::new(SendCommandResponse { success, command_id, code, message, clamped }))
    }

    async fn start_mission(&self, request: Request<StartMissionRequest>) -> Result<Response<StartMissionResponse>, Status> {
        let req = request.into_inner();
        if self.state.manager.get(&req.robot_id).await.is_none() {
            return Err(Status::not_found(format!("robot {} not found", req.robot_id)));
        }
        let moved = self.state.manager.start_move(&req.robot_id).await.is_ok();
        self.state.manager.set_mission(&req.robot_id, Some(req.mission_id)).await;
        Ok(Response::new(StartMissionResponse { accepted: moved }))
    }

    async fn cancel_mission(&self, request: Request<CancelMissionRequest>) -> Result<Response<CancelMissionResponse>, Status> {
        let req = request.into_inner();
        if self.state.manager.get(&req.robot_id).await.is_none() {
            return Err(Status::not_found(format!("robot {} not found", req.robot_id)));
        }
        let stopped = self.state.manager.stop(&req.robot_id).await.is_ok();
        self.state.manager.set_mission(&req.robot_id, None).await;
        Ok(Response::new(CancelMissionResponse { accepted: stopped }))
    }

    type StreamRobotStatusStream = Pin<Box<dyn Stream<Item = Result<RobotInfo, Status>> + Send + 'static>>;

    async fn stream_robot_status(
        &self,
        request: Request<StreamRobotStatusRequest>,
    ) -> Result<Response<Self::StreamRobotStatusStream>, Status> {
        let req = request.into_inner();
        let interval_ms = req.interval_ms.max(100);
        let ids: HashSet<String> = req.robot_ids.into_iter().collect();
        let state = self.state.clone();
        let cancel = self.state.shutdown.child_token();

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms as u64));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        for snapshot in state.manager.list().await {
                            if !ids.is_empty() && !ids.contains(&snapshot.id) {
                                continue;
                            }
                            if tx.send(Ok(RobotInfo::from(&snapshot))).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_health(&self, _request: Request<GetHealthRequest>) -> Result<Response<GetHealthResponse>, Status> {
        Ok(Response::new(GetHealthResponse {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            connected_robot_count: self.state.registry.connected_count() as u32,
            uptime_seconds: self.state.uptime_seconds(),
        }))
    }
}
