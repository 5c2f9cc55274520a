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

//! Acknowledgment state owned by the grouping worker

use super::AckSender;
use crate::message_id::{MessageId, Position};
use crate::metrics::AckTrackerMetrics;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-width bit vector over the indices of one batch.
///
/// A set bit means the index is not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BatchAckSet {
    words: Vec<u64>,
    len: usize,
}

impl BatchAckSet {
    pub(crate) fn all_pending(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(WORD_BITS)];
        let tail = len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self { words, len }
    }

    /// Out of range indices are ignored.
    pub(crate) fn clear(&mut self, index: usize) {
        if index < self.len {
            self.words[index / WORD_BITS] &= !(1u64 << (index % WORD_BITS));
        }
    }

    /// Out of range indices count as acknowledged.
    pub(crate) fn is_pending(&self, index: usize) -> bool {
        index < self.len && self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingAck {
    /// A non-batched message
    Single,
    /// Unacknowledged indices of a batched entry
    Batch(BatchAckSet),
}

fn batch_index(id: &MessageId) -> Option<usize> {
    id.batch_index().and_then(|i| usize::try_from(i).ok())
}

/// Buffered individual acks, the pending-ack index and the cumulative watermark.
pub(crate) struct CachedAcks {
    single_acks: Vec<MessageId>,
    max_size: usize,
    pending_acks: HashMap<Position, PendingAck>,
    last_cumulative_ack: MessageId,
    cumulative_ack_required: bool,
    sender: Arc<dyn AckSender>,
    metrics: AckTrackerMetrics,
}

impl CachedAcks {
    pub(crate) fn new(
        max_size: usize,
        sender: Arc<dyn AckSender>,
        metrics: AckTrackerMetrics,
    ) -> Self {
        Self {
            single_acks: Vec::with_capacity(max_size),
            max_size,
            pending_acks: HashMap::new(),
            last_cumulative_ack: MessageId::earliest(),
            cumulative_ack_required: false,
            sender,
            metrics,
        }
    }

    /// Buffer `id` and record it in the pending-ack index.
    ///
    /// Returns true once the buffer holds `max_size` ids.
    pub(crate) fn add_and_check_if_full(&mut self, id: MessageId) -> bool {
        self.single_acks.push(id);

        let key = id.position();
        let entry = self.pending_acks.entry(key).or_insert_with(|| {
            if id.is_batch() {
                PendingAck::Batch(BatchAckSet::all_pending(id.batch_size() as usize))
            } else {
                PendingAck::Single
            }
        });

        if let PendingAck::Batch(ack_set) = entry {
            if let Some(index) = batch_index(&id) {
                ack_set.clear(index);
            }
            if ack_set.is_empty() {
                self.pending_acks.remove(&key);
            }
        }

        self.single_acks.len() >= self.max_size
    }

    /// Returns true if the watermark moved.
    pub(crate) fn try_update_last_cumulative_ack(&mut self, id: MessageId) -> bool {
        if self.last_cumulative_ack.compare_position(&id) == Ordering::Less {
            self.last_cumulative_ack = id;
            self.cumulative_ack_required = true;
            return true;
        }
        false
    }

    pub(crate) fn is_duplicate(&self, id: &MessageId) -> bool {
        if id.compare_position(&self.last_cumulative_ack) != Ordering::Greater {
            return true;
        }
        match self.pending_acks.get(&id.position()) {
            None => false,
            Some(PendingAck::Single) => true,
            Some(PendingAck::Batch(_)) if !id.is_batch() => true,
            Some(PendingAck::Batch(ack_set)) => match batch_index(id) {
                Some(index) => !ack_set.is_pending(index),
                None => true,
            },
        }
    }

    pub(crate) async fn flush_individual_acks(&mut self) {
        if self.single_acks.is_empty() {
            return;
        }

        self.sender.ack_list(&self.single_acks).await;
        self.metrics.record_individual_acks(self.single_acks.len());
        debug!(count = self.single_acks.len(), "Flushed individual acks");

        // Drops the whole entry even when other indices of the batch are still
        // unacknowledged; those ids then report as not duplicate.
        for id in self.single_acks.drain(..) {
            self.pending_acks.remove(&id.position());
        }
    }

    pub(crate) async fn flush_cumulative_ack(&mut self) {
        if !self.cumulative_ack_required {
            return;
        }

        self.sender.ack_cumulative(self.last_cumulative_ack).await;
        self.metrics.record_cumulative_ack();
        self.cumulative_ack_required = false;
        debug!(id = %self.last_cumulative_ack, "Flushed cumulative ack");
    }

    pub(crate) async fn flush(&mut self) {
        self.flush_individual_acks().await;
        self.flush_cumulative_ack().await;
        self.metrics.record_flush();
    }

    pub(crate) fn clean(&mut self) {
        self.single_acks.clear();
        self.pending_acks.clear();
        self.last_cumulative_ack = MessageId::earliest();
        self.cumulative_ack_required = false;
    }

    pub(crate) fn buffered(&self) -> usize {
        self.single_acks.len()
    }

    pub(crate) fn pending_positions(&self) -> usize {
        self.pending_acks.len()
    }

    pub(crate) fn pending_batch_indices(&self, position: Position) -> Option<usize> {
        match self.pending_acks.get(&position) {
            Some(PendingAck::Batch(ack_set)) => Some(ack_set.pending_count()),
            Some(PendingAck::Single) => Some(0),
            None => None,
        }
    }

    pub(crate) fn last_cumulative_ack(&self) -> MessageId {
        self.last_cumulative_ack
    }
}
