// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter plug-in contract and the registry that looks adapters up by
//! robot id, grounded on `crates/cli/src/broker/registry.rs`'s
//! factory-by-kind lookup and health-gated create/remove lifecycle.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::Stream;
use tokio::time::timeout;
use tracing::warn;

use crate::command::Command;
use crate::error::AdapterError;
use crate::robot::types::{Capabilities, SensorRecord};
use crate::robot::Role;

pub type SensorBoxStream = Pin<Box<dyn Stream<Item = SensorRecord> + Send + 'static>>;

/// Capability set every vendor adapter must implement (spec.md §4.2).
/// Async methods use `async_trait` so the type stays object-safe; adapters
/// are shared across the session layer and the safety pipeline as
/// `Arc<dyn Adapter>`.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, config: &HashMap<String, String>) -> Result<(), AdapterError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn send_command(&self, command: &Command) -> Result<(), AdapterError>;

    fn sensor_stream(&self) -> SensorBoxStream;

    fn capabilities(&self) -> Capabilities;

    async fn emergency_stop(&self) -> Result<(), AdapterError>;
}

pub type AdapterFactory = Arc<dyn Fn() -> Arc<dyn Adapter> + Send + Sync>;

const DISCONNECT_DEADLINE: Duration = Duration::from_secs(5);
const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

/// Maps robot id -> active adapter. `get` is a lock-free read over the
/// underlying `DashMap` shard; `create`/`remove` take that shard's write
/// guard only for the duration of the mutation.
pub struct Registry {
    adapters: DashMap<String, Arc<dyn Adapter>>,
    factories: DashMap<String, AdapterFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { adapters: DashMap::new(), factories: DashMap::new() }
    }

    pub fn register_factory(&self, kind: &str, factory: AdapterFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub async fn create(
        &self,
        id: &str,
        kind: &str,
        config: &HashMap<String, String>,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        let factory = self
            .factories
            .get(kind)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AdapterError::UnknownKind(kind.to_string()))?;
        let adapter = factory();
        timeout(CONNECT_DEADLINE, adapter.connect(config))
            .await
            .map_err(|_| AdapterError::ConnectTimeout)??;
        self.adapters.insert(id.to_string(), adapter.clone());
        Ok(adapter)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(id).map(|entry| entry.value().clone())
    }

    pub async fn remove(&self, id: &str) {
        if let Some((_, adapter)) = self.adapters.remove(id) {
            if timeout(DISCONNECT_DEADLINE, adapter.disconnect()).await.is_err() {
                warn!(robot_id = %id, "adapter disconnect exceeded deadline, dropping anyway");
            }
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.adapters.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.adapters.iter().filter(|entry| entry.value().is_connected()).count()
    }
}

/// Minimum role required to invoke a given dispatch-table entry, per the
/// role guard column in spec.md §4.5.
pub fn min_role_for(message_type: &str) -> Option<Role> {
    match message_type {
        "velocity_cmd" | "nav_goal" | "nav_cancel" | "op_lock" | "op_unlock" => Some(Role::Operator),
        "subscribe" | "unsubscribe" => Some(Role::Viewer),
        "estop" | "ping" | "auth" => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullAdapter;

    #[async_trait::async_trait]
    impl Adapter for NullAdapter {
        fn name(&self) -> &str {
            "null"
        }
        async fn connect(&self, _config: &HashMap<String, String>) -> Result<(), AdapterError> {
            Ok(())
        }
        async fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            true
        }
        async fn send_command(&self, _command: &Command) -> Result<(), AdapterError> {
            Ok(())
        }
        fn sensor_stream(&self) -> SensorBoxStream {
            Box::pin(futures_util::stream::empty())
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        async fn emergency_stop(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_then_get_then_remove() {
        let registry = Registry::new();
        registry.register_factory("null", Arc::new(|| Arc::new(NullAdapter) as Arc<dyn Adapter>));
        registry.create("r1", "null", &HashMap::new()).await.unwrap();
        assert!(registry.get("r1").is_some());
        registry.remove("r1").await;
        assert!(registry.get("r1").is_none());
    }

    #[tokio::test]
    async fn unknown_kind_errors() {
        let registry = Registry::new();
        let err = registry.create("r1", "nope", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, AdapterError::UnknownKind(_)));
    }
}
