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

//! Acknowledgment grouping
//!
//! Collects individual and cumulative acknowledgments and hands them to an
//! [`AckSender`] in groups, either when `max_size` individual acks are buffered
//! or when `max_time` elapses. While acks wait in the group the tracker can
//! still tell whether a message was already acknowledged.
//!
//! With `max_size <= 1` no grouping happens and every ack is forwarded as soon
//! as it is added.

use crate::config::AckGroupingOptions;
use crate::message_id::MessageId;
use crate::Error;
use async_trait::async_trait;
use std::sync::Arc;

mod grouped;
mod pending;

pub use grouped::{GroupedAckTracker, TrackerSnapshot};

/// Sends acknowledgment frames to the broker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AckSender: Send + Sync {
    /// Acknowledge exactly one message
    async fn ack_individual(&self, id: MessageId);

    /// Acknowledge every message up to and including `id`
    async fn ack_cumulative(&self, id: MessageId);

    /// Acknowledge a group of messages
    async fn ack_list(&self, ids: &[MessageId]) {
        // TODO: send one list frame once the connection layer supports it
        for id in ids {
            self.ack_individual(*id).await;
        }
    }
}

#[async_trait]
pub trait AckGroupingTracker: Send + Sync {
    /// Queue an individual acknowledgment
    async fn add(&self, id: MessageId) -> Result<(), Error>;

    /// Advance the cumulative acknowledgment watermark
    async fn add_cumulative(&self, id: MessageId) -> Result<(), Error>;

    /// Whether an acknowledgment for `id` was already requested
    async fn is_duplicate(&self, id: MessageId) -> Result<bool, Error>;

    /// Send every pending acknowledgment and wait until it is handed off
    async fn flush(&self) -> Result<(), Error>;

    /// Flush, then forget all pending state, e.g. after a seek
    async fn flush_and_clean(&self) -> Result<(), Error>;

    /// Final flush; the tracker rejects every call afterwards
    async fn close(&self) -> Result<(), Error>;
}

/// Build the tracker matching `options`, falling back to the defaults when `None`.
///
/// The grouped tracker spawns its worker on the current tokio runtime.
pub fn new_ack_grouping_tracker(
    options: Option<AckGroupingOptions>,
    sender: Arc<dyn AckSender>,
) -> Arc<dyn AckGroupingTracker> {
    let options = options.unwrap_or_default();
    if !options.is_grouping_enabled() {
        return Arc::new(ImmediateAckTracker::new(sender));
    }
    Arc::new(GroupedAckTracker::new(options, sender))
}

/// Forwards every acknowledgment straight to the sender
pub struct ImmediateAckTracker {
    sender: Arc<dyn AckSender>,
}

impl ImmediateAckTracker {
    pub fn new(sender: Arc<dyn AckSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AckGroupingTracker for ImmediateAckTracker {
    async fn add(&self, id: MessageId) -> Result<(), Error> {
        self.sender.ack_individual(id).await;
        Ok(())
    }

    async fn add_cumulative(&self, id: MessageId) -> Result<(), Error> {
        self.sender.ack_cumulative(id).await;
        Ok(())
    }

    async fn is_duplicate(&self, _id: MessageId) -> Result<bool, Error> {
        // No local state, the broker drops duplicates.
        Ok(false)
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn flush_and_clean(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
