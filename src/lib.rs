// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet Gateway: mediates between browser operators and heterogeneous
//! AMRs reached through pluggable adapters, enforcing a mandatory safety
//! pipeline and forwarding telemetry to a downstream recorder.

pub mod adapter;
pub mod bridge;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod ratelimit;
pub mod robot;
pub mod rpc;
pub mod safety;
pub mod session;
pub mod state;
pub mod time;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::GatewayConfig;
use crate::session::auth::Authenticator;
use crate::state::GatewayState;

/// Builds the axum `Router` serving the WebSocket endpoint and the (unauth)
/// health check (spec.md §6 "WebSocket endpoint", §4.8 "Health check").
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let ws_path = state.config.ws_path.clone();
    Router::new()
        .route("/health", get(health_handler))
        .route(&ws_path, get(session::ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), ratelimit::rate_limit_layer))
        .layer(middleware::from_fn(ratelimit::trace_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(axum::extract::State(state): axum::extract::State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "connected_robot_count": state.registry.connected_count(),
        "uptime_seconds": state.uptime_seconds(),
    }))
}

/// Runs the gateway until `shutdown` is cancelled: the WebSocket/HTTP
/// listener, the gRPC control-plane listener, and the background loops
/// (watchdog, lock sweep, heartbeat sweep, forwarder flush) all share the
/// same `CancellationToken` tree (spec.md §5 "On gateway shutdown").
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let Some(pem) = &config.auth_public_key else {
        anyhow::bail!("AUTH_PUBLIC_KEY is required to start the gateway");
    };
    let authenticator = Some(Authenticator::from_pem(pem)?);

    let ws_addr: SocketAddr = ([0, 0, 0, 0], config.ws_port).into();
    let rpc_addr: SocketAddr = ([0, 0, 0, 0], config.rpc_port).into();

    let state = GatewayState::new(config, authenticator, shutdown.clone());

    spawn_background_loops(state.clone());

    let router = build_router(state.clone());
    let ws_listener = TcpListener::bind(ws_addr).await?;
    info!(%ws_addr, "websocket listener bound");

    let rpc_service = rpc::fleet_v1::fleet_gateway_server::FleetGatewayServer::new(rpc::FleetGatewayService::new(state.clone()));
    info!(%rpc_addr, "rpc listener bound");

    let ws_shutdown = shutdown.clone();
    let ws_server = axum::serve(ws_listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { ws_shutdown.cancelled().await });

    let rpc_shutdown = shutdown.clone();
    let rpc_server = tonic::transport::Server::builder()
        .add_service(rpc_service)
        .serve_with_shutdown(rpc_addr, async move { rpc_shutdown.cancelled().await });

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        ctrl_c_shutdown.cancel();
    });

    let (ws_result, rpc_result) = tokio::join!(ws_server, rpc_server);
    ws_result?;
    rpc_result?;

    state.forwarder.flush_all().await;
    info!("gateway shutdown complete");
    Ok(())
}

fn spawn_background_loops(state: Arc<GatewayState>) {
    let watchdog_state = state.clone();
    let watchdog_cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        let send_to_adapter: Arc<dyn Fn(crate::command::Command) + Send + Sync> = {
            let state = watchdog_state.clone();
            Arc::new(move |command: crate::command::Command| {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Some(adapter) = state.registry.get(&command.robot_id) {
                        let _ = adapter.send_command(&command).await;
                    }
                });
            })
        };
        safety::watchdog::run(
            watchdog_state.pipeline.clone(),
            send_to_adapter,
            watchdog_state.config.watchdog_interval(),
            watchdog_state.config.watchdog_interval(),
            watchdog_cancel,
        )
        .await;
    });

    let forwarder_cancel = state.shutdown.child_token();
    tokio::spawn(forwarder::run_flush_loop(state.forwarder.clone(), forwarder_cancel));

    let sweep_state = state.clone();
    let sweep_cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_state.config.watchdog_interval());
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => return,
                _ = interval.tick() => {
                    sweep_state.pipeline.locks.sweep_expired();
                }
            }
        }
    });

    let heartbeat_state = state.clone();
    let heartbeat_cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_state.config.heartbeat_timeout());
        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => return,
                _ = interval.tick() => {
                    let offline = heartbeat_state.manager.check_timeouts(heartbeat_state.config.heartbeat_timeout()).await;
                    for robot_id in offline {
                        heartbeat_state.pipeline.locks.force_release(&robot_id);
                    }
                }
            }
        }
    });
}
