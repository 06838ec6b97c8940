// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide fan-out index (spec.md §4.5 "Hub"). Sharded by robot id:
//! the outer `DashMap` key is `(robot_id, topic)`, so subscribers of
//! different robots never contend on the same shard, matching "Hub
//! subscription index: Sharded by robot id" in spec.md §5.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::json;
use tracing::debug;

use super::queue::DropOldestQueue;
use crate::codec::Envelope;
use crate::robot::types::SensorRecord;

type Key = (String, String);
type SessionQueue = Arc<DropOldestQueue<Envelope>>;

pub struct Hub {
    index: DashMap<Key, DashMap<String, SessionQueue>>,
    sessions: DashMap<String, Mutex<HashSet<Key>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self { index: DashMap::new(), sessions: DashMap::new() }
    }

    pub fn subscribe(&self, robot_id: &str, topic: &str, session_id: &str, queue: SessionQueue) {
        let key = (robot_id.to_string(), topic.to_string());
        self.index.entry(key.clone()).or_default().insert(session_id.to_string(), queue);
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Mutex::new(HashSet::new()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
    }

    pub fn unsubscribe(&self, robot_id: &str, topic: &str, session_id: &str) {
        let key = (robot_id.to_string(), topic.to_string());
        if let Some(subs) = self.index.get(&key) {
            subs.remove(session_id);
        }
        if let Some(keys) = self.sessions.get(session_id) {
            keys.lock().unwrap_or_else(|e| e.into_inner()).remove(&key);
        }
    }

    /// Tears down every subscription owned by a closing session (spec.md
    /// §4.5 "Closing": "deregisters subscriptions").
    pub fn unsubscribe_all(&self, session_id: &str) {
        if let Some((_, keys)) = self.sessions.remove(session_id) {
            for key in keys.into_inner().unwrap_or_else(|e| e.into_inner()) {
                if let Some(subs) = self.index.get(&key) {
                    subs.remove(session_id);
                }
            }
        }
    }

    pub fn subscription_count(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map(|keys| keys.lock().unwrap_or_else(|e| e.into_inner()).len()).unwrap_or(0)
    }

    /// Fans a sensor record out to every session subscribed to
    /// `(robot_id, topic)`, in adapter-production order (spec.md's P5).
    /// Per-session drop-oldest backpressure never blocks this call.
    pub fn publish(&self, record: &SensorRecord) {
        let key = (record.robot_id.clone(), record.topic.clone());
        let Some(subs) = self.index.get(&key) else { return };
        for entry in subs.iter() {
            let queue = entry.value();
            let dropped = queue.take_dropped();
            let envelope = Envelope::new("telemetry")
                .with_robot_id(record.robot_id.clone())
                .with_topic(record.topic.clone())
                .with_payload(json!({
                    "data_type": record.data_type,
                    "frame_id": record.frame_id,
                    "source_ts_ms": record.source_ts_ms,
                    "fields": record.fields,
                }))
                .with_dropped(dropped);
            queue.push(envelope);
        }
        debug!(robot_id = %record.robot_id, topic = %record.topic, subscriber_count = subs.len(), "published telemetry");
    }

    /// Broadcasts a safety-alert (clamp event) to every subscriber of a
    /// robot, regardless of topic (spec.md §4.4 stage 3).
    pub fn broadcast_safety_alert(&self, robot_id: &str, reason: &str) {
        let mut seen = HashSet::new();
        for entry in self.index.iter() {
            let (entry_robot, _topic) = entry.key();
            if entry_robot != robot_id {
                continue;
            }
            for session in entry.value().iter() {
                if !seen.insert(session.key().clone()) {
                    continue;
                }
                let envelope = Envelope::new("safety-alert")
                    .with_robot_id(robot_id.to_string())
                    .with_payload(json!({"reason": reason, "clamped": true}));
                session.value().push(envelope);
            }
        }
    }
}
