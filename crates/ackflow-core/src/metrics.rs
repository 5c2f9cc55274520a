/*
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Lock-free counters for the flow control components

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters updated by the ack grouping tracker
#[derive(Debug, Clone)]
pub struct AckTrackerMetrics {
    pub individual_acks_sent: Arc<AtomicU64>,
    pub cumulative_acks_sent: Arc<AtomicU64>,
    pub flushes: Arc<AtomicU64>,
    pub duplicate_hits: Arc<AtomicU64>,
}

impl Default for AckTrackerMetrics {
    fn default() -> Self {
        Self {
            individual_acks_sent: Arc::new(AtomicU64::new(0)),
            cumulative_acks_sent: Arc::new(AtomicU64::new(0)),
            flushes: Arc::new(AtomicU64::new(0)),
            duplicate_hits: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl AckTrackerMetrics {
    pub fn record_individual_acks(&self, count: usize) {
        self.individual_acks_sent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_cumulative_ack(&self) {
        self.cumulative_acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_hit(&self) {
        self.duplicate_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> AckTrackerSnapshot {
        AckTrackerSnapshot {
            individual_acks_sent: self.individual_acks_sent.load(Ordering::Relaxed),
            cumulative_acks_sent: self.cumulative_acks_sent.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            duplicate_hits: self.duplicate_hits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckTrackerSnapshot {
    pub individual_acks_sent: u64,
    pub cumulative_acks_sent: u64,
    pub flushes: u64,
    pub duplicate_hits: u64,
}

/// Counters updated by the memory limit controller
#[derive(Debug, Clone)]
pub struct MemoryLimitMetrics {
    pub denied_reservations: Arc<AtomicU64>,
    pub blocked_reservations: Arc<AtomicU64>,
    pub cancelled_reservations: Arc<AtomicU64>,
    pub wake_broadcasts: Arc<AtomicU64>,
}

impl Default for MemoryLimitMetrics {
    fn default() -> Self {
        Self {
            denied_reservations: Arc::new(AtomicU64::new(0)),
            blocked_reservations: Arc::new(AtomicU64::new(0)),
            cancelled_reservations: Arc::new(AtomicU64::new(0)),
            wake_broadcasts: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl MemoryLimitMetrics {
    pub fn record_denied(&self) {
        self.denied_reservations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked_reservations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled_reservations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self) {
        self.wake_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MemoryLimitSnapshot {
        MemoryLimitSnapshot {
            denied_reservations: self.denied_reservations.load(Ordering::Relaxed),
            blocked_reservations: self.blocked_reservations.load(Ordering::Relaxed),
            cancelled_reservations: self.cancelled_reservations.load(Ordering::Relaxed),
            wake_broadcasts: self.wake_broadcasts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimitSnapshot {
    pub denied_reservations: u64,
    pub blocked_reservations: u64,
    pub cancelled_reservations: u64,
    pub wake_broadcasts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_metrics_snapshot() {
        let metrics = AckTrackerMetrics::default();
        let shared = metrics.clone();

        metrics.record_individual_acks(3);
        metrics.record_cumulative_ack();
        shared.record_flush();

        let snapshot = shared.get_snapshot();
        assert_eq!(snapshot.individual_acks_sent, 3);
        assert_eq!(snapshot.cumulative_acks_sent, 1);
        assert_eq!(snapshot.flushes, 1);
        assert_eq!(snapshot.duplicate_hits, 0);
    }

    #[test]
    fn test_memory_metrics_snapshot() {
        let metrics = MemoryLimitMetrics::default();
        metrics.record_blocked();
        metrics.record_cancelled();
        metrics.record_broadcast();
        metrics.record_broadcast();

        let snapshot = metrics.get_snapshot();
        assert_eq!(snapshot.blocked_reservations, 1);
        assert_eq!(snapshot.cancelled_reservations, 1);
        assert_eq!(snapshot.wake_broadcasts, 2);
        assert_eq!(snapshot.denied_reservations, 0);
    }
}
