// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod convert;
pub mod service;

/// Generated protobuf/tonic bindings for the `fleet.v1` package (see
/// `proto/fleet/v1/fleet.proto`, compiled by `build.rs`).
pub mod fleet_v1 {
    tonic::include_proto!("fleet.v1");
}

pub use service::FleetGatewayService;
