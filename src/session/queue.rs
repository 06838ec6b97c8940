// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, single-producer multi-push / single-consumer queue with
//! drop-oldest backpressure (spec.md §4.5, design note in §9: "Bounded
//! send queues with drop-oldest replace any unbounded-queue pattern").
//! Pushing never blocks the caller — a full queue drops its oldest entry
//! instead — so a slow session can never stall the hub's fan-out loop or
//! the adapter reader feeding it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    inner: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed_flag: AtomicBool,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            closed_flag: AtomicBool::new(false),
        }
    }

    pub fn push(&self, item: T) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(item);
        drop(guard);
        self.notify.notify_one();
    }

    /// Pops the oldest item, waiting if the queue is currently empty.
    /// Returns `None` only once `close()` has been called and the queue has
    /// drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = guard.pop_front() {
                    return Some(item);
                }
                if self.closed() {
                    return None;
                }
            }
            self.notify.notified().await;
            if self.closed() {
                let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = guard.pop_front() {
                    return Some(item);
                }
                return None;
            }
        }
    }

    pub fn close(&self) {
        self.closed_flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn closed(&self) -> bool {
        self.closed_flag.load(Ordering::Acquire)
    }

    /// Swaps the drop counter to zero and returns the count accumulated
    /// since the previous call (spec.md §4.5 "dropped:N").
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_past_capacity_drops_oldest() {
        let queue: DropOldestQueue<i32> = DropOldestQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.take_dropped(), 1);
    }

    #[tokio::test]
    async fn recv_returns_in_fifo_order() {
        let queue: DropOldestQueue<i32> = DropOldestQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(queue.recv().await, Some(2));
    }

    #[tokio::test]
    async fn closed_empty_queue_returns_none() {
        let queue: DropOldestQueue<i32> = DropOldestQueue::new(4);
        queue.close();
        assert_eq!(queue.recv().await, None);
    }
}
