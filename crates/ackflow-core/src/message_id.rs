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

//! Message identifiers
//!
//! A [`MessageId`] names one message by its ledger/entry position and, when the
//! message was packed into a broker-level batch, by its index inside that batch.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Ledger/entry coordinates shared by every message of one broker entry
pub type Position = (i64, i64);

/// Coordinates of a message inside a batched entry
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCoordinates {
    pub index: i32,
    pub size: i32,
}

/// Immutable, totally ordered identifier of a message
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId {
    pub ledger_id: i64,
    pub entry_id: i64,
    pub partition: i32,
    pub batch: Option<BatchCoordinates>,
}

impl MessageId {
    pub fn new(ledger_id: i64, entry_id: i64, partition: i32) -> Self {
        Self {
            ledger_id,
            entry_id,
            partition,
            batch: None,
        }
    }

    pub fn with_batch(mut self, index: i32, size: i32) -> Self {
        self.batch = Some(BatchCoordinates { index, size });
        self
    }

    /// The id that sorts before every id a broker can hand out
    pub fn earliest() -> Self {
        Self::new(-1, -1, -1)
    }

    /// The id that sorts after every id a broker can hand out
    pub fn latest() -> Self {
        Self::new(i64::MAX, i64::MAX, -1)
    }

    pub fn position(&self) -> Position {
        (self.ledger_id, self.entry_id)
    }

    pub fn batch_index(&self) -> Option<i32> {
        self.batch.map(|b| b.index)
    }

    pub fn batch_size(&self) -> i32 {
        self.batch.map(|b| b.size).unwrap_or(0)
    }

    /// A message is batched only if it shares its entry with at least one other message.
    pub fn is_batch(&self) -> bool {
        matches!(self.batch, Some(b) if b.index >= 0 && b.size > 1)
    }

    /// Compares where two ids sit in the ledger, ignoring partition and batch size.
    ///
    /// A missing or negative batch index stands for the whole entry and sorts
    /// after every index of that entry. This is the order acknowledgments
    /// are deduplicated by.
    pub fn compare_position(&self, other: &Self) -> Ordering {
        let index = |id: &Self| id.batch_index().filter(|i| *i >= 0);
        self.ledger_id
            .cmp(&other.ledger_id)
            .then(self.entry_id.cmp(&other.entry_id))
            .then_with(|| match (index(self), index(other)) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(&b),
            })
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ledger_id
            .cmp(&other.ledger_id)
            .then(self.entry_id.cmp(&other.entry_id))
            .then_with(|| {
                // Acks on (l, e, 0) .. (l, e, N-1) precede the ack on the whole entry (l, e).
                match (self.batch_index(), other.batch_index()) {
                    (None, None) => Ordering::Equal,
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(a), Some(b)) => a.cmp(&b),
                }
            })
            .then(self.partition.cmp(&other.partition))
            .then_with(|| self.batch_size().cmp(&other.batch_size()))
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.ledger_id, self.entry_id, self.partition)?;
        if let Some(batch) = self.batch {
            write!(f, ":{}/{}", batch.index, batch.size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_by_position_then_batch_index() {
        let a = MessageId::new(1, 5, 0);
        let b = MessageId::new(1, 6, 0);
        let c = MessageId::new(2, 0, 0);
        assert!(a < b);
        assert!(b < c);

        let first = MessageId::new(1, 5, 0).with_batch(0, 3);
        let second = MessageId::new(1, 5, 0).with_batch(2, 3);
        assert!(first < second);
        assert!(second < a);
    }

    #[test]
    fn test_earliest_and_latest_bound_everything() {
        let id = MessageId::new(0, 0, 0);
        assert!(MessageId::earliest() < id);
        assert!(MessageId::latest() > id);
        assert!(MessageId::earliest() < MessageId::new(-1, 0, -1));
    }

    #[test]
    fn test_is_batch() {
        assert!(!MessageId::new(1, 1, 0).is_batch());
        assert!(!MessageId::new(1, 1, 0).with_batch(0, 1).is_batch());
        assert!(!MessageId::new(1, 1, 0).with_batch(-1, 4).is_batch());
        assert!(MessageId::new(1, 1, 0).with_batch(3, 4).is_batch());
    }

    #[test]
    fn test_ord_consistent_with_eq() {
        let a = MessageId::new(3, 4, 0).with_batch(1, 2);
        let b = MessageId::new(3, 4, 0).with_batch(1, 2);
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_ne!(a, MessageId::new(3, 4, 1).with_batch(1, 2));
    }

    #[test]
    fn test_compare_position_ignores_partition_and_size() {
        let a = MessageId::new(1, 5, 0);
        let b = MessageId::new(1, 5, 1);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.compare_position(&b), Ordering::Equal);

        let x = MessageId::new(1, 5, 0).with_batch(2, 3);
        let y = MessageId::new(1, 5, 0).with_batch(2, 8);
        assert_eq!(x.compare_position(&y), Ordering::Equal);
        assert_eq!(x.compare_position(&a), Ordering::Less);
        assert_eq!(
            MessageId::earliest().compare_position(&MessageId::new(-1, -1, 0)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_negative_batch_index_means_whole_entry() {
        let whole = MessageId::new(1, 5, 0);
        let negative = MessageId::new(1, 5, 0).with_batch(-1, 4);
        assert_eq!(negative.compare_position(&whole), Ordering::Equal);
        assert_eq!(
            MessageId::new(1, 5, 0)
                .with_batch(3, 4)
                .compare_position(&negative),
            Ordering::Less
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(MessageId::new(7, 8, 0).to_string(), "7:8:0");
        assert_eq!(
            MessageId::new(7, 8, 0).with_batch(1, 3).to_string(),
            "7:8:0:1/3"
        );
    }
}
