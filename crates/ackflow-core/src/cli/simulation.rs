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

//! Synthetic consumer workload driving both flow control components

use crate::ack_grouping::{new_ack_grouping_tracker, AckGroupingTracker, AckSender};
use crate::config::{FlowControlConfig, SimulationConfig};
use crate::memory_limit::MemoryLimitController;
use crate::message_id::MessageId;
use crate::metrics::MemoryLimitSnapshot;
use crate::Error;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

const LEDGER_ID: i64 = 1;
const REDELIVERY_INTERVAL: i64 = 10;

/// Sender that counts the frames it would have written
#[derive(Debug, Default)]
pub struct CountingAckSender {
    individual: AtomicU64,
    cumulative: AtomicU64,
}

impl CountingAckSender {
    pub fn individual(&self) -> u64 {
        self.individual.load(Ordering::Relaxed)
    }

    pub fn cumulative(&self) -> u64 {
        self.cumulative.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AckSender for CountingAckSender {
    async fn ack_individual(&self, id: MessageId) {
        trace!(%id, "ack");
        self.individual.fetch_add(1, Ordering::Relaxed);
    }

    async fn ack_cumulative(&self, id: MessageId) {
        trace!(%id, "cumulative ack");
        self.cumulative.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub delivered: u64,
    pub duplicates_skipped: u64,
    pub individual_acks_sent: u64,
    pub cumulative_acks_sent: u64,
    pub cancelled: bool,
    pub peak_usage: i64,
    pub memory: MemoryLimitSnapshot,
}

pub struct Simulation {
    config: SimulationConfig,
    memory: Arc<MemoryLimitController>,
    tracker: Arc<dyn AckGroupingTracker>,
    sender: Arc<CountingAckSender>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ConsumerStats {
    delivered: AtomicU64,
    duplicates: AtomicU64,
    peak_usage: AtomicI64,
}

impl Simulation {
    /// Must be called inside a tokio runtime.
    pub fn new(config: &FlowControlConfig, cancel: CancellationToken) -> Self {
        let sender = Arc::new(CountingAckSender::default());
        let tracker = new_ack_grouping_tracker(
            Some(config.ack_grouping.clone()),
            sender.clone() as Arc<dyn AckSender>,
        );
        Self {
            config: config.simulation.clone().unwrap_or_default(),
            memory: Arc::new(MemoryLimitController::from_config(&config.memory_limit)),
            tracker,
            sender,
            cancel,
        }
    }

    pub fn memory(&self) -> Arc<MemoryLimitController> {
        self.memory.clone()
    }

    pub async fn run(self) -> Result<SimulationReport, Error> {
        let batch_size = self.config.batch_size.max(1);
        let entries = (self.config.messages as i64 + batch_size as i64 - 1) / batch_size as i64;
        let consumers = self.config.consumers.max(1);
        info!(
            entries,
            consumers,
            limit = self.memory.limit(),
            "Starting simulation"
        );

        let stats = Arc::new(ConsumerStats::default());
        let handles: Vec<_> = (0..consumers)
            .map(|consumer| {
                let worker = ConsumerWorker {
                    consumer: consumer as i64,
                    consumers: consumers as i64,
                    entries,
                    batch_size,
                    message_size: self.config.message_size,
                    cumulative_every: self.config.cumulative_every as i64,
                    memory: self.memory.clone(),
                    tracker: self.tracker.clone(),
                    cancel: self.cancel.clone(),
                    stats: stats.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.map_err(|e| Error::Unknown(format!("Consumer task failed: {}", e)))??;
        }

        self.tracker.close().await?;

        Ok(SimulationReport {
            delivered: stats.delivered.load(Ordering::Relaxed),
            duplicates_skipped: stats.duplicates.load(Ordering::Relaxed),
            individual_acks_sent: self.sender.individual(),
            cumulative_acks_sent: self.sender.cumulative(),
            cancelled: self.cancel.is_cancelled(),
            peak_usage: stats.peak_usage.load(Ordering::Relaxed),
            memory: self.memory.metrics().get_snapshot(),
        })
    }
}

struct ConsumerWorker {
    consumer: i64,
    consumers: i64,
    entries: i64,
    batch_size: i32,
    message_size: i64,
    cumulative_every: i64,
    memory: Arc<MemoryLimitController>,
    tracker: Arc<dyn AckGroupingTracker>,
    cancel: CancellationToken,
    stats: Arc<ConsumerStats>,
}

impl ConsumerWorker {
    async fn run(self) -> Result<(), Error> {
        let mut entry = self.consumer;
        while entry < self.entries {
            for index in 0..self.batch_size {
                if !self.deliver(self.message_id(entry, index)).await? {
                    debug!(consumer = self.consumer, "Consumer stopped");
                    return Ok(());
                }
            }

            // Redeliver the first message of some entries to exercise duplicate checks.
            if entry % REDELIVERY_INTERVAL == 0
                && !self.deliver(self.message_id(entry, 0)).await?
            {
                return Ok(());
            }

            if self.cumulative_every > 0 && entry > 0 && entry % self.cumulative_every == 0 {
                let upto = (entry - self.consumers).max(0);
                self.tracker
                    .add_cumulative(MessageId::new(LEDGER_ID, upto, 0))
                    .await?;
            }

            entry += self.consumers;
        }
        Ok(())
    }

    fn message_id(&self, entry: i64, index: i32) -> MessageId {
        let id = MessageId::new(LEDGER_ID, entry, 0);
        if self.batch_size > 1 {
            id.with_batch(index, self.batch_size)
        } else {
            id
        }
    }

    /// Returns false when the reservation was cancelled.
    async fn deliver(&self, id: MessageId) -> Result<bool, Error> {
        if !self
            .memory
            .reserve_memory(&self.cancel, self.message_size)
            .await
        {
            return Ok(false);
        }
        self.stats
            .peak_usage
            .fetch_max(self.memory.current_usage(), Ordering::Relaxed);

        let result = self.acknowledge(id).await;
        self.memory.release_memory(self.message_size);
        result.map(|_| true)
    }

    async fn acknowledge(&self, id: MessageId) -> Result<(), Error> {
        if self.tracker.is_duplicate(id).await? {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        self.tracker.add(id).await
    }
}
