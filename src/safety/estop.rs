// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage 1 of the safety pipeline (spec.md §4.4 "E-Stop Check"). State is
//! an atomic pair per spec.md §5: a flag plus metadata, held both globally
//! and per robot. Release is a distinct code path from activation so the
//! monotonic invariant in spec.md §3 ("E-Stop State") cannot be bypassed by
//! re-sending an activation frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct EstopMeta {
    pub activator: String,
    pub activated_at: Instant,
    pub reason: Option<String>,
}

struct EstopCell {
    active: AtomicBool,
    meta: Mutex<Option<EstopMeta>>,
}

impl EstopCell {
    fn new() -> Self {
        Self { active: AtomicBool::new(false), meta: Mutex::new(None) }
    }
}

/// Tracks global and per-robot E-Stop state. Per-robot cells are created
/// lazily on first touch.
pub struct EstopRegistry {
    global: EstopCell,
    per_robot: DashMap<String, EstopCell>,
}

impl Default for EstopRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EstopRegistry {
    pub fn new() -> Self {
        Self { global: EstopCell::new(), per_robot: DashMap::new() }
    }

    pub fn is_active(&self, robot_id: &str) -> bool {
        if self.global.active.load(Ordering::Acquire) {
            return true;
        }
        self.per_robot.get(robot_id).map(|cell| cell.active.load(Ordering::Acquire)).unwrap_or(false)
    }

    pub fn activate_robot(&self, robot_id: &str, activator: &str, reason: Option<String>) {
        let cell = self.per_robot.entry(robot_id.to_string()).or_insert_with(EstopCell::new);
        cell.active.store(true, Ordering::Release);
        let mut meta = cell.meta.lock().unwrap_or_else(|e| e.into_inner());
        *meta = Some(EstopMeta { activator: activator.to_string(), activated_at: Instant::now(), reason });
    }

    pub fn release_robot(&self, robot_id: &str) {
        if let Some(cell) = self.per_robot.get(robot_id) {
            cell.active.store(false, Ordering::Release);
            let mut meta = cell.meta.lock().unwrap_or_else(|e| e.into_inner());
            *meta = None;
        }
    }

    pub fn activate_global(&self, activator: &str, reason: Option<String>) {
        self.global.active.store(true, Ordering::Release);
        let mut meta = self.global.meta.lock().unwrap_or_else(|e| e.into_inner());
        *meta = Some(EstopMeta { activator: activator.to_string(), activated_at: Instant::now(), reason });
    }

    pub fn release_global(&self) {
        self.global.active.store(false, Ordering::Release);
        let mut meta = self.global.meta.lock().unwrap_or_else(|e| e.into_inner());
        *meta = None;
    }

    pub fn robot_meta(&self, robot_id: &str) -> Option<EstopMeta> {
        self.per_robot.get(robot_id).and_then(|cell| cell.meta.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
