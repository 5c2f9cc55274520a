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

//! Size and time grouped acknowledgment tracker
//!
//! All state lives in a single worker task. Handles talk to it over one
//! rendezvous channel, so commands from one caller are applied in the order
//! they were issued, and request/reply calls carry their own oneshot channel.

use super::pending::CachedAcks;
use super::{AckGroupingTracker, AckSender};
use crate::config::AckGroupingOptions;
use crate::message_id::{MessageId, Position};
use crate::metrics::AckTrackerMetrics;
use crate::Error;
use async_trait::async_trait;
use flume::{Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushKind {
    FlushOnly,
    FlushAndClean,
    FlushAndClose,
}

enum Command {
    Individual(MessageId),
    Cumulative(MessageId),
    IsDuplicate(MessageId, oneshot::Sender<bool>),
    Flush(FlushKind, oneshot::Sender<()>),
    Snapshot(Option<Position>, oneshot::Sender<TrackerSnapshot>),
}

/// Point-in-time view of the worker state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    /// Individual acks waiting for the next flush
    pub buffered: usize,
    /// Positions present in the pending-ack index
    pub pending_positions: usize,
    /// Unacknowledged indices left for the requested position, if it is tracked
    pub pending_batch_indices: Option<usize>,
    pub last_cumulative_ack: MessageId,
}

pub struct GroupedAckTracker {
    commands: Sender<Command>,
    metrics: AckTrackerMetrics,
}

impl GroupedAckTracker {
    /// Spawn the worker on the current tokio runtime.
    pub fn new(options: AckGroupingOptions, sender: Arc<dyn AckSender>) -> Self {
        let (commands, receiver) = flume::bounded(0);
        let metrics = AckTrackerMetrics::default();

        let worker = GroupedAckWorker {
            commands: receiver,
            acks: CachedAcks::new(options.max_size, sender, metrics.clone()),
            max_time: options.max_time,
            metrics: metrics.clone(),
        };
        tokio::spawn(worker.run());

        Self { commands, metrics }
    }

    pub fn metrics(&self) -> AckTrackerMetrics {
        self.metrics.clone()
    }

    /// Inspect the worker state, optionally for one position of the pending-ack index.
    pub async fn snapshot(&self, position: Option<Position>) -> Result<TrackerSnapshot, Error> {
        self.request(|reply| Command::Snapshot(position, reply)).await
    }

    async fn send(&self, command: Command) -> Result<(), Error> {
        self.commands
            .send_async(command)
            .await
            .map_err(|_| Error::TrackerClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Error> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| Error::TrackerClosed)
    }

    async fn flush_with(&self, kind: FlushKind) -> Result<(), Error> {
        self.request(|reply| Command::Flush(kind, reply)).await
    }
}

#[async_trait]
impl AckGroupingTracker for GroupedAckTracker {
    async fn add(&self, id: MessageId) -> Result<(), Error> {
        self.send(Command::Individual(id)).await
    }

    async fn add_cumulative(&self, id: MessageId) -> Result<(), Error> {
        self.send(Command::Cumulative(id)).await
    }

    async fn is_duplicate(&self, id: MessageId) -> Result<bool, Error> {
        self.request(|reply| Command::IsDuplicate(id, reply)).await
    }

    async fn flush(&self) -> Result<(), Error> {
        self.flush_with(FlushKind::FlushOnly).await
    }

    async fn flush_and_clean(&self) -> Result<(), Error> {
        self.flush_with(FlushKind::FlushAndClean).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.flush_with(FlushKind::FlushAndClose).await
    }
}

struct GroupedAckWorker {
    commands: Receiver<Command>,
    acks: CachedAcks,
    max_time: Duration,
    metrics: AckTrackerMetrics,
}

/// Longest flush period; later deadlines cannot be represented by every clock.
const MAX_FLUSH_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Periodic flush timer that can be stopped and restarted.
struct FlushTimer {
    interval: Option<Interval>,
    armed: bool,
}

impl FlushTimer {
    fn new(period: Duration) -> Self {
        if period.is_zero() {
            return Self {
                interval: None,
                armed: false,
            };
        }
        let period = period.min(MAX_FLUSH_PERIOD);
        let start = Instant::now()
            .checked_add(period)
            .unwrap_or_else(Instant::now);
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Some(interval),
            armed: true,
        }
    }

    fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Restart the period from now.
    fn rearm(&mut self) {
        if let Some(interval) = self.interval.as_mut() {
            interval.reset();
            self.armed = true;
        }
    }

    fn arm_if_stopped(&mut self) {
        if !self.armed {
            self.rearm();
        }
    }

    fn stop(&mut self) {
        self.armed = false;
    }

    async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) if self.armed => {
                interval.tick().await;
            }
            _ => std::future::pending::<()>().await,
        }
    }
}

impl GroupedAckWorker {
    async fn run(mut self) {
        let mut timer = FlushTimer::new(self.max_time);
        debug!(
            max_time = ?self.max_time,
            time_flush = timer.is_enabled(),
            "Ack grouping tracker started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv_async() => {
                    let Ok(command) = command else {
                        // Every handle is gone, nobody can ask for a flush anymore.
                        self.acks.flush().await;
                        break;
                    };
                    if !self.handle(command, &mut timer).await {
                        break;
                    }
                }
                _ = timer.tick() => {
                    self.acks.flush().await;
                }
            }
        }

        info!("Ack grouping tracker stopped");
    }

    /// Returns false once the worker must exit.
    async fn handle(&mut self, command: Command, timer: &mut FlushTimer) -> bool {
        match command {
            Command::Individual(id) => {
                if self.acks.add_and_check_if_full(id) {
                    self.acks.flush_individual_acks().await;
                    timer.rearm();
                } else {
                    timer.arm_if_stopped();
                }
            }
            Command::Cumulative(id) => {
                self.acks.try_update_last_cumulative_ack(id);
                if timer.is_enabled() {
                    timer.arm_if_stopped();
                } else {
                    self.acks.flush_cumulative_ack().await;
                }
            }
            Command::IsDuplicate(id, reply) => {
                let duplicate = self.acks.is_duplicate(&id);
                if duplicate {
                    self.metrics.record_duplicate_hit();
                }
                if reply.send(duplicate).is_err() {
                    warn!(%id, "Duplicate check caller went away");
                }
            }
            Command::Flush(kind, reply) => {
                timer.stop();
                self.acks.flush().await;
                if kind == FlushKind::FlushAndClean {
                    self.acks.clean();
                }
                if reply.send(()).is_err() {
                    warn!(?kind, "Flush caller went away");
                }
                if kind == FlushKind::FlushAndClose {
                    return false;
                }
            }
            Command::Snapshot(position, reply) => {
                let snapshot = TrackerSnapshot {
                    buffered: self.acks.buffered(),
                    pending_positions: self.acks.pending_positions(),
                    pending_batch_indices: position
                        .and_then(|p| self.acks.pending_batch_indices(p)),
                    last_cumulative_ack: self.acks.last_cumulative_ack(),
                };
                if reply.send(snapshot).is_err() {
                    warn!("Snapshot caller went away");
                }
            }
        }
        true
    }
}
