//! Typed error kinds shared across the gateway, grounded on
//! `coopmux::error::MuxError`'s split between a machine-readable code and a
//! human-readable message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reject/error codes surfaced to WebSocket and RPC clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    AuthFailed,
    RoleDenied,
    EstopActive,
    LockedByOther,
    IllegalTransition,
    BadRequest,
    RobotNotFound,
    AdapterUnavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::RoleDenied => "ROLE_DENIED",
            Self::EstopActive => "ESTOP_ACTIVE",
            Self::LockedByOther => "LOCKED_BY_OTHER",
            Self::IllegalTransition => "ILLEGAL_TRANSITION",
            Self::BadRequest => "BAD_REQUEST",
            Self::RobotNotFound => "ROBOT_NOT_FOUND",
            Self::AdapterUnavailable => "ADAPTER_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthFailed => 401,
            Self::RoleDenied => 403,
            Self::EstopActive | Self::LockedByOther | Self::IllegalTransition => 409,
            Self::BadRequest => 400,
            Self::RobotNotFound => 404,
            Self::AdapterUnavailable => 502,
            Self::Internal => 500,
        }
    }

    pub fn to_grpc_status(self, message: impl Into<String>) -> tonic::Status {
        let message = message.into();
        match self {
            Self::AuthFailed => tonic::Status::unauthenticated(message),
            Self::RoleDenied => tonic::Status::permission_denied(message),
            Self::EstopActive | Self::LockedByOther | Self::IllegalTransition => {
                tonic::Status::failed_precondition(message)
            }
            Self::BadRequest => tonic::Status::invalid_argument(message),
            Self::RobotNotFound => tonic::Status::not_found(message),
            Self::AdapterUnavailable => tonic::Status::unavailable(message),
            Self::Internal => tonic::Status::internal(message),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an [`crate::adapter::Adapter`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter connect timed out")]
    ConnectTimeout,
    #[error("adapter not connected")]
    NotConnected,
    #[error("adapter send timed out")]
    SendTimeout,
    #[error("adapter transport error: {0}")]
    Transport(String),
    #[error("unknown adapter kind: {0}")]
    UnknownKind(String),
}

/// Error returned while validating a command transition through the FSM.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal transition {from:?} -> {to:?} for robot {robot_id}")]
pub struct IllegalTransition {
    pub robot_id: String,
    pub from: crate::robot::fsm::RobotState,
    pub to: crate::robot::fsm::RobotState,
}

/// Error returned by the forwarder's RPC client.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("recorder RPC timed out")]
    Timeout,
    #[error("recorder RPC failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("recorder transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}
