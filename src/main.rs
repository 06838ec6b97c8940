// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use fleet_gateway::config::GatewayConfig;

#[tokio::main]
async fn main() {
    let config = GatewayConfig::parse();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    if config.auth_public_key.is_none() {
        error!("AUTH_PUBLIC_KEY is required to start the gateway");
        std::process::exit(1);
    }

    if let Err(e) = fleet_gateway::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
