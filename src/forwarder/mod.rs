// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batching/backpressure stage that relays sensor and command records to
//! the downstream recording service (spec.md §4.6). Two independent
//! buffers so a stall in one never stalls the other; grounded on the
//! teacher's periodic-poll-plus-notify shape (`upstream::health`'s ticker
//! loop) adapted to a push-triggered flush instead of a pure interval.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::command::Command;
use crate::robot::types::SensorRecord;
use crate::rpc::fleet_v1::data_recording_client::DataRecordingClient;
use crate::rpc::fleet_v1::{BatchCommandRequest, BatchSensorRequest, CommandRecordProto, SensorRecordProto};

const FLUSH_DEADLINE: Duration = Duration::from_secs(5);
pub const FLUSH_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub robot_id: String,
    pub command_id: String,
    pub user_id: String,
    pub kind: String,
    pub ingress_ts_ms: i64,
    pub approved: bool,
    pub reject_code: Option<String>,
}

impl CommandRecord {
    pub fn approved(command: &Command) -> Self {
        Self {
            robot_id: command.robot_id.clone(),
            command_id: command.command_id.clone(),
            user_id: command.user_id.clone(),
            kind: command.kind.type_str().to_string(),
            ingress_ts_ms: command.ingress_ts_ms,
            approved: true,
            reject_code: None,
        }
    }

    pub fn rejected(command: &Command, code: &str) -> Self {
        Self {
            robot_id: command.robot_id.clone(),
            command_id: command.command_id.clone(),
            user_id: command.user_id.clone(),
            kind: command.kind.type_str().to_string(),
            ingress_ts_ms: command.ingress_ts_ms,
            approved: false,
            reject_code: Some(code.to_string()),
        }
    }
}

impl From<&SensorRecord> for SensorRecordProto {
    fn from(record: &SensorRecord) -> Self {
        Self {
            robot_id: record.robot_id.clone(),
            topic: record.topic.clone(),
            data_type: record.data_type.clone(),
            frame_id: record.frame_id.clone(),
            source_ts_ms: record.source_ts_ms,
            fields: record.fields.clone(),
        }
    }
}

impl From<&CommandRecord> for CommandRecordProto {
    fn from(record: &CommandRecord) -> Self {
        Self {
            robot_id: record.robot_id.clone(),
            command_id: record.command_id.clone(),
            user_id: record.user_id.clone(),
            kind: record.kind.clone(),
            ingress_ts_ms: record.ingress_ts_ms,
            approved: record.approved,
            reject_code: record.reject_code.clone(),
        }
    }
}

struct Buffer<T> {
    items: Mutex<VecDeque<T>>,
    high_water: usize,
    notify: Notify,
}

impl<T> Buffer<T> {
    fn new(high_water: usize) -> Self {
        Self { items: Mutex::new(VecDeque::new()), high_water, notify: Notify::new() }
    }

    /// Appends a record; returns whether the buffer just reached its
    /// high-water mark, signalling the caller to trigger an immediate flush.
    fn add(&self, item: T) -> bool {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.push_back(item);
        let reached = items.len() >= self.high_water;
        drop(items);
        if reached {
            self.notify.notify_one();
        }
        reached
    }

    fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.drain(..).collect()
    }

    /// Puts records back at the front after a failed flush; drops the
    /// oldest down to `high_water` if the combined length would exceed 2x.
    fn requeue_or_drop(&self, mut failed: Vec<T>, label: &str) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        failed.extend(items.drain(..));
        let limit = self.high_water * 2;
        if failed.len() > limit {
            let drop_count = failed.len() - self.high_water;
            warn!(buffer = label, drop_count, "forwarder buffer exceeded 2x high-water, dropping oldest");
            failed.drain(0..drop_count);
        }
        *items = failed.into();
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct Forwarder {
    sensor: Buffer<SensorRecord>,
    command: Buffer<CommandRecord>,
    client: Option<DataRecordingClient<Channel>>,
}

impl Forwarder {
    /// `recorder_addr` is resolved lazily: `connect_lazy` never blocks
    /// construction on a live connection, matching the teacher's preference
    /// for non-blocking startup with best-effort background reconnects.
    pub fn new(high_water: usize, recorder_addr: &str) -> Self {
        let client = Endpoint::from_shared(format!("http://{recorder_addr}"))
            .ok()
            .map(|endpoint| DataRecordingClient::new(endpoint.connect_lazy()));
        Self { sensor: Buffer::new(high_water), command: Buffer::new(high_water), client }
    }

    pub fn add_sensor(&self, record: SensorRecord) -> bool {
        self.sensor.add(record)
    }

    pub fn add_command(&self, record: CommandRecord) -> bool {
        self.command.add(record)
    }

    pub fn sensor_len(&self) -> usize {
        self.sensor.len()
    }

    pub fn command_len(&self) -> usize {
        self.command.len()
    }

    pub async fn flush_sensor(&self) {
        let batch = self.sensor.drain();
        if batch.is_empty() {
            return;
        }
        let Some(client) = self.client.clone() else { return };
        let mut client = client;
        let count = batch.len();
        let request = BatchSensorRequest { records: batch.iter().map(SensorRecordProto::from).collect() };
        match timeout(FLUSH_DEADLINE, client.batch_sensor(request)).await {
            Ok(Ok(response)) => debug!(acked = response.into_inner().recorded_count, "sensor batch flushed"),
            Ok(Err(status)) => {
                warn!(error = %status, count, "sensor batch RPC failed, requeuing");
                self.sensor.requeue_or_drop(batch, "sensor");
            }
            Err(_) => {
                warn!(count, "sensor batch RPC timed out, requeuing");
                self.sensor.requeue_or_drop(batch, "sensor");
            }
        }
    }

    pub async fn flush_command(&self) {
        let batch = self.command.drain();
        if batch.is_empty() {
            return;
        }
        let Some(client) = self.client.clone() else { return };
        let mut client = client;
        let count = batch.len();
        let request = BatchCommandRequest { records: batch.iter().map(CommandRecordProto::from).collect() };
        match timeout(FLUSH_DEADLINE, client.batch_command(request)).await {
            Ok(Ok(response)) => debug!(acked = response.into_inner().recorded_count, "command batch flushed"),
            Ok(Err(status)) => {
                warn!(error = %status, count, "command batch RPC failed, requeuing");
                self.command.requeue_or_drop(batch, "command");
            }
            Err(_) => {
                warn!(count, "command batch RPC timed out, requeuing");
                self.command.requeue_or_drop(batch, "command");
            }
        }
    }

    pub async fn flush_all(&self) {
        tokio::join!(self.flush_sensor(), self.flush_command());
    }

    /// Resolves once the sensor buffer has reached its high-water mark since
    /// the last time this (or `flush_sensor`'s drain) was awaited (spec.md
    /// §4.6 "Reaching high-water triggers an immediate asynchronous flush").
    async fn sensor_high_water(&self) {
        self.sensor.notify.notified().await;
    }

    async fn command_high_water(&self) {
        self.command.notify.notified().await;
    }
}

/// Runs the 1 s flush timer until `cancel` fires, reacting immediately to
/// either buffer crossing its high-water mark, then performs one final
/// synchronous flush of both buffers on cancel (spec.md §4.6 "Shutdown").
pub async fn run_flush_loop(forwarder: std::sync::Arc<Forwarder>, cancel: tokio_util::sync::CancellationToken) {
    let mut interval = tokio::time::interval(FLUSH_TICK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                forwarder.flush_all().await;
                return;
            }
            _ = interval.tick() => {
                forwarder.flush_all().await;
            }
            _ = forwarder.sensor_high_water() => {
                forwarder.flush_sensor().await;
            }
            _ = forwarder.command_high_water() => {
                forwarder.flush_command().await;
            }
        }
    }
}
