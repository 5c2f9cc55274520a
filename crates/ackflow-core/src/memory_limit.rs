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

//! Memory limit controller
//!
//! Admission control over a bounded memory budget. Reservations take a
//! lock-free compare-and-swap fast path; callers that must wait park on a
//! broadcast notification which is raised only when a release brings usage
//! back under the limit.
//!
//! The gate closes on `current > limit`, not on `current + size > limit`, so a
//! single in-flight reservation may push usage past the limit once.

use crate::config::MemoryLimitConfig;
use crate::metrics::MemoryLimitMetrics;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct MemoryLimitController {
    limit: i64,
    current_usage: AtomicI64,
    released: Notify,
    metrics: MemoryLimitMetrics,
}

impl MemoryLimitController {
    /// Create a controller; a non-positive `limit` disables the limit.
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            current_usage: AtomicI64::new(0),
            released: Notify::new(),
            metrics: MemoryLimitMetrics::default(),
        }
    }

    pub fn from_config(config: &MemoryLimitConfig) -> Self {
        Self::new(config.limit_bytes)
    }

    /// Reserve `size` bytes, waiting for released capacity if necessary.
    ///
    /// Returns `false` if `cancel` fires before the reservation succeeds; usage
    /// is left untouched in that case.
    pub async fn reserve_memory(&self, cancel: &CancellationToken, size: i64) -> bool {
        if self.try_reserve_memory(size) {
            return true;
        }

        self.metrics.record_blocked();
        trace!(size, usage = self.current_usage(), "Waiting for memory");

        loop {
            // Register interest before re-checking so a release in between is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_reserve_memory(size) {
                return true;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.metrics.record_cancelled();
                    debug!(size, "Memory reservation cancelled");
                    return false;
                }
                _ = &mut notified => {}
            }
        }
    }

    pub fn try_reserve_memory(&self, size: i64) -> bool {
        loop {
            let current = self.current_usage.load(Ordering::Acquire);
            if self.is_memory_limited() && current > self.limit {
                self.metrics.record_denied();
                return false;
            }

            if self
                .current_usage
                .compare_exchange_weak(
                    current,
                    current.wrapping_add(size),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Account for memory that must not be refused, e.g. data already received.
    pub fn force_reserve_memory(&self, size: i64) {
        self.current_usage.fetch_add(size, Ordering::AcqRel);
    }

    pub fn release_memory(&self, size: i64) {
        let old_usage = self.current_usage.fetch_sub(size, Ordering::AcqRel);
        let new_usage = old_usage.wrapping_sub(size);
        if old_usage > self.limit && new_usage <= self.limit {
            self.metrics.record_broadcast();
            trace!(new_usage, "Usage back under limit, waking waiters");
            self.released.notify_waiters();
        }
    }

    pub fn current_usage(&self) -> i64 {
        self.current_usage.load(Ordering::Acquire)
    }

    pub fn current_usage_percent(&self) -> f64 {
        self.current_usage() as f64 / self.limit as f64
    }

    pub fn is_memory_limited(&self) -> bool {
        self.limit > 0
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn metrics(&self) -> MemoryLimitMetrics {
        self.metrics.clone()
    }
}
