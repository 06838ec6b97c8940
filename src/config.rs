// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Runtime configuration for the fleet gateway, bound from flags or
/// environment variables interchangeably.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "fleet-gateway", version)]
pub struct GatewayConfig {
    /// Control-plane RPC listen port.
    #[arg(long, default_value_t = 50051, env = "RPC_PORT")]
    pub rpc_port: u16,

    /// WebSocket listen port.
    #[arg(long, default_value_t = 8082, env = "WS_PORT")]
    pub ws_port: u16,

    /// WebSocket upgrade path.
    #[arg(long, default_value = "/ws", env = "WS_PATH")]
    pub ws_path: String,

    /// PEM-encoded public key used to verify session auth tokens.
    #[arg(long, env = "AUTH_PUBLIC_KEY")]
    pub auth_public_key: Option<String>,

    /// Downstream recording service address.
    #[arg(long, default_value = "recorder:50052", env = "RECORDER_ADDR")]
    pub recorder_addr: String,

    /// High-water mark per forwarder buffer, in records.
    #[arg(long, default_value_t = 500, env = "FORWARDER_BUFFER")]
    pub forwarder_buffer: usize,

    /// Watchdog tick period and command staleness window, in milliseconds.
    #[arg(long, default_value_t = 500, env = "WATCHDOG_INTERVAL_MS")]
    pub watchdog_interval_ms: u64,

    /// Heartbeat offline threshold, in milliseconds.
    #[arg(long, default_value_t = 15_000, env = "HEARTBEAT_TIMEOUT_MS")]
    pub heartbeat_timeout_ms: u64,

    /// Default per-robot linear velocity clamp, overridden by capabilities.
    #[arg(long, default_value_t = 1.0, env = "MAX_LINEAR_VEL")]
    pub max_linear_vel: f64,

    /// Default per-robot angular velocity clamp.
    #[arg(long, default_value_t = 2.0, env = "MAX_ANGULAR_VEL")]
    pub max_angular_vel: f64,

    /// Operation lock auto-expiry, in seconds.
    #[arg(long, default_value_t = 300, env = "LOCK_TTL_SEC")]
    pub lock_ttl_sec: u64,

    /// Ingress rate limit per source address, requests per minute.
    #[arg(long, default_value_t = 120, env = "RATE_LIMIT_PER_MIN")]
    pub rate_limit_per_min: u32,

    /// Verbose logging.
    #[arg(long, default_value_t = false, env = "DEBUG")]
    pub debug: bool,

    /// Release operation locks held by a session when it closes, instead of
    /// leaving them to expire naturally. Resolves spec.md's open question in
    /// favor of the documented default (persist until expiry).
    #[arg(long, default_value_t = false, env = "RELEASE_LOCKS_ON_DISCONNECT")]
    pub release_locks_on_disconnect: bool,

    /// Minimum role required to clear an active E-Stop. Any of
    /// "viewer", "operator", "admin". Default permits any authenticated role.
    #[arg(long, default_value = "viewer", env = "ESTOP_RELEASE_ROLE")]
    pub estop_release_role: String,

    /// Adapter reconnect backoff base, in milliseconds.
    #[arg(long, default_value_t = 100, env = "ADAPTER_BACKOFF_BASE_MS")]
    pub adapter_backoff_base_ms: u64,

    /// Adapter reconnect backoff cap, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "ADAPTER_BACKOFF_CAP_MS")]
    pub adapter_backoff_cap_ms: u64,
}

impl GatewayConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_sec)
    }

    pub fn adapter_backoff_base(&self) -> Duration {
        Duration::from_millis(self.adapter_backoff_base_ms)
    }

    pub fn adapter_backoff_cap(&self) -> Duration {
        Duration::from_millis(self.adapter_backoff_cap_ms)
    }

    pub fn estop_release_role(&self) -> crate::robot::types::Role {
        crate::robot::types::Role::from_str_lenient(&self.estop_release_role)
    }
}
