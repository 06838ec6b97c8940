// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage 2 of the safety pipeline (spec.md §4.4 "Operation Lock"). Each
//! robot gets its own small lock rather than one global mutex, grounded on
//! the teacher's per-session fine-grained fields (`SessionEntry`'s own
//! `RwLock`/`AtomicU32`) rather than a single coarse table lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::robot::Role;

#[derive(Debug, Clone)]
pub struct OperationLock {
    pub user_id: String,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockVerdict {
    Unlocked,
    OwnedByCaller,
    OverriddenByAdmin,
    LockedByOther,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("robot already locked by another user")]
    LockedByOther,
    #[error("lock not held by this user")]
    NotHeldByCaller,
}

pub struct LockRegistry {
    locks: DashMap<String, OperationLock>,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Stage 2's read-only check, used to gate velocity/navigation
    /// commands. Admin role bypasses a foreign lock; the caller records the
    /// `LOCK_OVERRIDE` audit flag when this returns `OverriddenByAdmin`.
    pub fn check(&self, robot_id: &str, user_id: &str, role: Role) -> LockVerdict {
        match self.locks.get(robot_id) {
            None => LockVerdict::Unlocked,
            Some(lock) if lock.user_id == user_id => LockVerdict::OwnedByCaller,
            Some(_) if role == Role::Admin => LockVerdict::OverriddenByAdmin,
            Some(_) => LockVerdict::LockedByOther,
        }
    }

    /// Lock acquire short-circuits stage 2 per spec.md §4.4: any role with
    /// operator+ access may acquire an unlocked robot, or re-acquire (renew)
    /// its own lock; admins may also steal a foreign lock.
    pub fn acquire(&self, robot_id: &str, user_id: &str, role: Role, ttl: Duration) -> Result<(), LockError> {
        if let Some(existing) = self.locks.get(robot_id) {
            if existing.user_id != user_id && role != Role::Admin {
                return Err(LockError::LockedByOther);
            }
        }
        let now = Instant::now();
        self.locks.insert(
            robot_id.to_string(),
            OperationLock { user_id: user_id.to_string(), acquired_at: now, expires_at: now + ttl },
        );
        Ok(())
    }

    pub fn release(&self, robot_id: &str, user_id: &str, role: Role) -> Result<(), LockError> {
        match self.locks.get(robot_id) {
            Some(lock) if lock.user_id == user_id || role == Role::Admin => {
                drop(lock);
                self.locks.remove(robot_id);
                Ok(())
            }
            Some(_) => Err(LockError::NotHeldByCaller),
            None => Ok(()),
        }
    }

    /// Forcibly drops a robot's lock regardless of owner, used by
    /// heartbeat-timeout handling (spec.md §4.3 "check_timeouts").
    pub fn force_release(&self, robot_id: &str) {
        self.locks.remove(robot_id);
    }

    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .locks
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for robot_id in &expired {
            self.locks.remove(robot_id);
        }
        expired
    }

    pub fn holder_of(&self, robot_id: &str) -> Option<String> {
        self.locks.get(robot_id).map(|lock| lock.user_id.clone())
    }
}
