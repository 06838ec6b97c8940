// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::adapter::Registry;
use crate::config::GatewayConfig;
use crate::forwarder::Forwarder;
use crate::ratelimit::RateLimiter;
use crate::robot::RobotManager;
use crate::safety::SafetyPipeline;
use crate::session::auth::Authenticator;
use crate::session::hub::Hub;

/// Shared gateway state, handed to every session task, RPC handler, and
/// background loop as an `Arc<GatewayState>`.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub manager: Arc<RobotManager>,
    pub registry: Registry,
    pub pipeline: Arc<SafetyPipeline>,
    pub hub: Arc<Hub>,
    pub forwarder: Arc<Forwarder>,
    pub rate_limiter: RateLimiter,
    pub authenticator: Option<Authenticator>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, authenticator: Option<Authenticator>, shutdown: CancellationToken) -> Arc<Self> {
        let rate_limiter = RateLimiter::new(config.rate_limit_per_min, std::time::Duration::from_secs(60));
        let forwarder = Arc::new(Forwarder::new(config.forwarder_buffer, &config.recorder_addr));
        Arc::new(Self {
            config,
            manager: Arc::new(RobotManager::new()),
            registry: Registry::new(),
            pipeline: Arc::new(SafetyPipeline::new()),
            hub: Arc::new(Hub::new()),
            forwarder,
            rate_limiter,
            authenticator,
            shutdown,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> i64 {
        self.started_at.elapsed().as_secs() as i64
    }

    /// Creates an adapter for `robot_id` via the registry's factory lookup,
    /// registers the robot in the catalog, and spawns the bridge task that
    /// drains the adapter's sensor stream into the Hub, the Manager's
    /// latest-sensor store, and the Forwarder (spec.md §5, §11 item 2).
    pub async fn onboard_robot(
        self: &Arc<Self>,
        id: &str,
        name: &str,
        vendor: &str,
        model: &str,
        kind: &str,
        adapter_config: std::collections::HashMap<String, String>,
    ) -> Result<(), crate::error::AdapterError> {
        let adapter = self.registry.create(id, kind, &adapter_config).await?;
        self.manager.register(id, name, vendor, model, adapter.capabilities()).await;

        let cancel = self.shutdown.child_token();
        tokio::spawn(crate::bridge::run(
            id.to_string(),
            adapter,
            adapter_config,
            self.hub.clone(),
            self.manager.clone(),
            self.forwarder.clone(),
            self.config.adapter_backoff_base(),
            self.config.adapter_backoff_cap(),
            cancel,
        ));
        Ok(())
    }
}
