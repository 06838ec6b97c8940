// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-robot task that owns an adapter's sensor stream and fans each record
//! out to the Hub, the Robot Manager's latest-sensor store, and the
//! Forwarder's recording buffer (spec.md §5 "one per adapter sensor
//! stream"). Reconnects with exponential backoff on stream exhaustion,
//! grounded on `upstream::bridge::run_loop`'s 100ms-to-cap backoff shape
//! (spec.md §11 item 2, §9 Open Questions resolution).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::Adapter;
use crate::forwarder::Forwarder;
use crate::robot::types::SensorRecord;
use crate::robot::{Pose, RobotManager, RobotState};
use crate::session::hub::Hub;

/// Drains `adapter`'s sensor stream until it ends or `cancel` fires, then
/// attempts to reconnect with the adapter's own `config` before resuming.
/// Runs until `cancel` is triggered, typically for the lifetime of the
/// robot's registration.
pub async fn run(
    robot_id: String,
    adapter: Arc<dyn Adapter>,
    config: HashMap<String, String>,
    hub: Arc<Hub>,
    manager: Arc<RobotManager>,
    forwarder: Arc<Forwarder>,
    backoff_base: Duration,
    backoff_cap: Duration,
    cancel: CancellationToken,
) {
    let mut backoff = backoff_base;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let mut stream = adapter.sensor_stream();
        backoff = backoff_base;
        debug!(robot_id = %robot_id, "adapter sensor stream attached");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(record) => {
                            manager.touch(&robot_id).await;
                            if let Some((state, battery, pose)) = parse_status_fields(&record) {
                                if let Err(e) = manager.update_status(&robot_id, state, battery, pose).await {
                                    warn!(robot_id = %robot_id, error = %e, "rejected status update from adapter");
                                }
                            }
                            hub.publish(&record);
                            forwarder.add_sensor(record.clone());
                            manager.record_sensor(record).await;
                        }
                        None => break,
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        warn!(robot_id = %robot_id, "adapter sensor stream ended, attempting reconnect");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            match adapter.connect(&config).await {
                Ok(()) => {
                    if let Err(e) = manager.mark_reconnected(&robot_id).await {
                        warn!(robot_id = %robot_id, error = %e, "mark_reconnected rejected after adapter reconnect");
                    }
                    break;
                }
                Err(e) => {
                    warn!(robot_id = %robot_id, error = %e, backoff_ms = backoff.as_millis(), "adapter reconnect failed");
                    backoff = (backoff * 2).min(backoff_cap);
                }
            }
        }
    }
}

/// Parses a full status report out of a sensor record's opaque `fields` map
/// (`state`, `battery`, and optional `x`/`y`/`theta`), used to drive
/// `RobotManager::update_status` from adapter telemetry rather than only
/// refreshing `last_seen`. Records that don't carry a recognized `state`
/// field (e.g. a bare pose or lidar sample) are left to `touch` alone.
fn parse_status_fields(record: &SensorRecord) -> Option<(RobotState, f64, Pose)> {
    let state = RobotState::parse(record.fields.get("state")?)?;
    let battery = record.fields.get("battery")?.parse::<f64>().ok()?;
    let x = record.fields.get("x").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    let y = record.fields.get("y").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    let theta = record.fields.get("theta").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
    Some((state, battery, Pose { x, y, theta }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::robot::types::{Capabilities, SensorRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        records: Vec<SensorRecord>,
        connects: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Adapter for CountingAdapter {
        fn name(&self) -> &str {
            "counting"
        }
        async fn connect(&self, _config: &HashMap<String, String>) -> Result<(), AdapterError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            true
        }
        async fn send_command(&self, _command: &crate::command::Command) -> Result<(), AdapterError> {
            Ok(())
        }
        fn sensor_stream(&self) -> crate::adapter::SensorBoxStream {
            Box::pin(futures_util::stream::iter(self.records.clone()).chain(futures_util::stream::pending()))
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        async fn emergency_stop(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn record(robot_id: &str) -> SensorRecord {
        SensorRecord {
            robot_id: robot_id.to_string(),
            topic: "pose".to_string(),
            data_type: "pose".to_string(),
            frame_id: "map".to_string(),
            source_ts_ms: 0,
            fields: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn publishes_records_then_stops_on_cancel() {
        let adapter: Arc<dyn Adapter> = Arc::new(CountingAdapter { records: vec![record("r1"), record("r1")], connects: AtomicUsize::new(0) });
        let hub = Arc::new(Hub::new());
        let manager = Arc::new(RobotManager::new());
        let forwarder = Arc::new(Forwarder::new(10, "127.0.0.1:1"));
        let cancel = CancellationToken::new();

        let queue = Arc::new(crate::session::queue::DropOldestQueue::new(8));
        hub.subscribe("r1", "pose", "s1", queue.clone());

        let cancel_inner = cancel.clone();
        let handle = tokio::spawn(run(
            "r1".to_string(),
            adapter,
            HashMap::new(),
            hub,
            manager.clone(),
            forwarder.clone(),
            Duration::from_millis(1),
            Duration::from_millis(10),
            cancel_inner,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert_eq!(forwarder.sensor_len(), 2);
        assert!(manager.latest_sensor("r1", "pose").await.is_some());
    }

    fn status_record(robot_id: &str, state: &str, battery: &str) -> SensorRecord {
        let mut fields = HashMap::new();
        fields.insert("state".to_string(), state.to_string());
        fields.insert("battery".to_string(), battery.to_string());
        SensorRecord {
            robot_id: robot_id.to_string(),
            topic: "status".to_string(),
            data_type: "status".to_string(),
            frame_id: "base".to_string(),
            source_ts_ms: 0,
            fields,
        }
    }

    #[tokio::test]
    async fn status_record_drives_update_status_and_touch_refreshes_unrecognized_records() {
        let adapter: Arc<dyn Adapter> = Arc::new(CountingAdapter {
            records: vec![status_record("r1", "moving", "87.5"), record("r1")],
            connects: AtomicUsize::new(0),
        });
        let hub = Arc::new(Hub::new());
        let manager = Arc::new(RobotManager::new());
        manager.register("r1", "Bot", "acme", "m1", Capabilities::default()).await;
        let forwarder = Arc::new(Forwarder::new(10, "127.0.0.1:1"));
        let cancel = CancellationToken::new();

        let cancel_inner = cancel.clone();
        let handle = tokio::spawn(run(
            "r1".to_string(),
            adapter,
            HashMap::new(),
            hub,
            manager.clone(),
            forwarder.clone(),
            Duration::from_millis(1),
            Duration::from_millis(10),
            cancel_inner,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        let snap = manager.get("r1").await.unwrap();
        assert_eq!(snap.state, crate::robot::RobotState::Moving);
        assert_eq!(snap.battery, 87.5);
        assert!(snap.online);
    }

    #[tokio::test]
    async fn reconnect_after_stream_end_marks_robot_reconnected() {
        struct OneShotAdapter {
            connects: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl Adapter for OneShotAdapter {
            fn name(&self) -> &str {
                "one-shot"
            }
            async fn connect(&self, _config: &HashMap<String, String>) -> Result<(), AdapterError> {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn disconnect(&self) {}
            fn is_connected(&self) -> bool {
                true
            }
            async fn send_command(&self, _command: &crate::command::Command) -> Result<(), AdapterError> {
                Ok(())
            }
            fn sensor_stream(&self) -> crate::adapter::SensorBoxStream {
                Box::pin(futures_util::stream::empty())
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities::default()
            }
            async fn emergency_stop(&self) -> Result<(), AdapterError> {
                Ok(())
            }
        }

        let adapter: Arc<dyn Adapter> = Arc::new(OneShotAdapter { connects: AtomicUsize::new(0) });
        let hub = Arc::new(Hub::new());
        let manager = Arc::new(RobotManager::new());
        manager.register("r1", "Bot", "acme", "m1", Capabilities::default()).await;
        manager.update_status("r1", crate::robot::RobotState::Moving, 50.0, Pose::default()).await.unwrap();
        manager.check_timeouts(Duration::from_secs(0)).await;
        let forwarder = Arc::new(Forwarder::new(10, "127.0.0.1:1"));
        let cancel = CancellationToken::new();

        let cancel_inner = cancel.clone();
        let handle = tokio::spawn(run(
            "r1".to_string(),
            adapter,
            HashMap::new(),
            hub,
            manager.clone(),
            forwarder.clone(),
            Duration::from_millis(1),
            Duration::from_millis(5),
            cancel_inner,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        let snap = manager.get("r1").await.unwrap();
        assert_eq!(snap.state, crate::robot::RobotState::Idle);
        assert!(snap.online);
    }
}
