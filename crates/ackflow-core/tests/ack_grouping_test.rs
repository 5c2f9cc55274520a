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

use ackflow_core::ack_grouping::{
    new_ack_grouping_tracker, AckGroupingTracker, AckSender, GroupedAckTracker,
};
use ackflow_core::{AckGroupingOptions, Error, MessageId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingAckSender {
    individual: Mutex<Vec<MessageId>>,
    cumulative: Mutex<Vec<MessageId>>,
}

impl RecordingAckSender {
    fn individual(&self) -> Vec<MessageId> {
        self.individual.lock().unwrap().clone()
    }

    fn cumulative(&self) -> Vec<MessageId> {
        self.cumulative.lock().unwrap().clone()
    }
}

#[async_trait]
impl AckSender for RecordingAckSender {
    async fn ack_individual(&self, id: MessageId) {
        self.individual.lock().unwrap().push(id);
    }

    async fn ack_cumulative(&self, id: MessageId) {
        self.cumulative.lock().unwrap().push(id);
    }
}

fn options(max_size: usize, max_time: Duration) -> AckGroupingOptions {
    AckGroupingOptions { max_size, max_time }
}

fn grouped(max_size: usize, max_time: Duration) -> (GroupedAckTracker, Arc<RecordingAckSender>) {
    let sender = Arc::new(RecordingAckSender::default());
    let tracker = GroupedAckTracker::new(options(max_size, max_time), sender.clone());
    (tracker, sender)
}

fn id(entry: i64) -> MessageId {
    MessageId::new(1, entry, 0)
}

const HOUR: Duration = Duration::from_secs(3600);

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_full_buffer_flushes_every_id_once() {
    let (tracker, sender) = grouped(4, HOUR);

    for entry in 0..3 {
        tracker.add(id(entry)).await.unwrap();
    }
    assert_eq!(tracker.snapshot(None).await.unwrap().buffered, 3);
    assert!(sender.individual().is_empty());

    tracker.add(id(3)).await.unwrap();
    let snapshot = tracker.snapshot(None).await.unwrap();
    assert_eq!(snapshot.buffered, 0);
    assert_eq!(snapshot.pending_positions, 0);
    assert_eq!(sender.individual(), vec![id(0), id(1), id(2), id(3)]);
    assert_eq!(tracker.metrics().get_snapshot().individual_acks_sent, 4);
}

#[tokio::test]
async fn test_pending_single_message_is_duplicate() {
    let (tracker, _sender) = grouped(10, HOUR);

    tracker.add(id(7)).await.unwrap();
    assert!(tracker.is_duplicate(id(7)).await.unwrap());
    assert!(!tracker.is_duplicate(id(8)).await.unwrap());
    assert_eq!(tracker.metrics().get_snapshot().duplicate_hits, 1);
}

#[tokio::test]
async fn test_cumulative_watermark_dominates_before_flush() {
    let (tracker, sender) = grouped(10, HOUR);

    tracker.add_cumulative(id(10)).await.unwrap();
    assert!(tracker.is_duplicate(id(5)).await.unwrap());
    assert!(tracker.is_duplicate(id(10)).await.unwrap());
    assert!(tracker
        .is_duplicate(id(10).with_batch(3, 4))
        .await
        .unwrap());
    assert!(!tracker.is_duplicate(id(11)).await.unwrap());
    assert!(sender.cumulative().is_empty());

    // Older cumulative acks do not move the watermark back.
    tracker.add_cumulative(id(4)).await.unwrap();
    tracker.flush().await.unwrap();
    assert_eq!(sender.cumulative(), vec![id(10)]);
}

#[tokio::test]
async fn test_batch_indices_are_tracked_bit_by_bit() {
    let (tracker, sender) = grouped(10, HOUR);
    let entry = id(20);

    tracker.add(entry.with_batch(0, 3)).await.unwrap();
    tracker.add(entry.with_batch(2, 3)).await.unwrap();

    assert!(tracker.is_duplicate(entry.with_batch(0, 3)).await.unwrap());
    assert!(!tracker.is_duplicate(entry.with_batch(1, 3)).await.unwrap());
    assert!(tracker.is_duplicate(entry.with_batch(2, 3)).await.unwrap());
    let snapshot = tracker.snapshot(Some(entry.position())).await.unwrap();
    assert_eq!(snapshot.pending_batch_indices, Some(1));

    tracker.add(entry.with_batch(1, 3)).await.unwrap();
    let snapshot = tracker.snapshot(Some(entry.position())).await.unwrap();
    assert_eq!(snapshot.pending_batch_indices, None);
    assert_eq!(snapshot.pending_positions, 0);
    assert_eq!(snapshot.buffered, 3);

    tracker.flush().await.unwrap();
    assert_eq!(sender.individual().len(), 3);
}

#[tokio::test]
async fn test_batch_completed_by_size_flush() {
    let (tracker, sender) = grouped(3, HOUR);
    let entry = id(21);

    tracker.add(entry.with_batch(0, 3)).await.unwrap();
    tracker.add(entry.with_batch(2, 3)).await.unwrap();
    assert!(!tracker.is_duplicate(entry.with_batch(1, 3)).await.unwrap());

    tracker.add(entry.with_batch(1, 3)).await.unwrap();
    let snapshot = tracker.snapshot(Some(entry.position())).await.unwrap();
    assert_eq!(snapshot.pending_positions, 0);
    assert_eq!(sender.individual().len(), 3);
}

#[tokio::test]
async fn test_flush_drops_partially_acknowledged_batch() {
    // A flush forgets the whole position, so acknowledged indices of a batch
    // that still has unacknowledged ones are no longer reported as duplicate.
    let (tracker, sender) = grouped(2, HOUR);
    let entry = id(30);

    tracker.add(entry.with_batch(0, 4)).await.unwrap();
    tracker.add(entry.with_batch(1, 4)).await.unwrap();

    assert!(!tracker.is_duplicate(entry.with_batch(0, 4)).await.unwrap());
    assert!(!tracker.is_duplicate(entry.with_batch(2, 4)).await.unwrap());
    assert_eq!(sender.individual().len(), 2);
    let snapshot = tracker.snapshot(Some(entry.position())).await.unwrap();
    assert_eq!(snapshot.pending_batch_indices, None);
}

#[tokio::test]
async fn test_flush_and_clean_resets_duplicate_state() {
    let (tracker, sender) = grouped(10, HOUR);

    tracker.add(id(40)).await.unwrap();
    tracker.add(id(41).with_batch(0, 2)).await.unwrap();
    tracker.add_cumulative(id(35)).await.unwrap();
    assert!(tracker.is_duplicate(id(40)).await.unwrap());
    assert!(tracker.is_duplicate(id(30)).await.unwrap());

    tracker.flush_and_clean().await.unwrap();
    assert_eq!(sender.individual(), vec![id(40), id(41).with_batch(0, 2)]);
    assert_eq!(sender.cumulative(), vec![id(35)]);

    assert!(!tracker.is_duplicate(id(40)).await.unwrap());
    assert!(!tracker.is_duplicate(id(41).with_batch(0, 2)).await.unwrap());
    assert!(!tracker.is_duplicate(id(30)).await.unwrap());
    let snapshot = tracker.snapshot(None).await.unwrap();
    assert_eq!(snapshot.last_cumulative_ack, MessageId::earliest());

    // Re-submitted ids are tracked again.
    tracker.add(id(40)).await.unwrap();
    assert!(tracker.is_duplicate(id(40)).await.unwrap());
}

#[tokio::test]
async fn test_cumulative_watermark_ignores_partition() {
    let (tracker, _sender) = grouped(10, HOUR);

    tracker.add_cumulative(MessageId::new(1, 5, 0)).await.unwrap();
    assert!(tracker
        .is_duplicate(MessageId::new(1, 5, 1))
        .await
        .unwrap());

    tracker.flush_and_clean().await.unwrap();
    assert!(tracker
        .is_duplicate(MessageId::new(-1, -1, 0))
        .await
        .unwrap());
    assert!(!tracker
        .is_duplicate(MessageId::new(1, 5, 1))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unbounded_max_time_keeps_worker_alive() {
    let (tracker, sender) = grouped(10, Duration::MAX);

    tracker.add(id(1)).await.unwrap();
    assert!(tracker.is_duplicate(id(1)).await.unwrap());
    tracker.add_cumulative(id(0)).await.unwrap();

    // Explicit flush stops the timer and the next ack restarts it.
    tracker.flush().await.unwrap();
    tracker.add(id(2)).await.unwrap();
    assert!(tracker.is_duplicate(id(2)).await.unwrap());

    tracker.close().await.unwrap();
    assert_eq!(sender.individual(), vec![id(1), id(2)]);
    assert_eq!(sender.cumulative(), vec![id(0)]);
}

#[tokio::test]
async fn test_close_delivers_buffered_acks_and_rejects_later_calls() {
    let (tracker, sender) = grouped(10, HOUR);

    tracker.add(id(1)).await.unwrap();
    tracker.add(id(2)).await.unwrap();
    tracker.add_cumulative(id(0)).await.unwrap();
    tracker.close().await.unwrap();

    assert_eq!(sender.individual(), vec![id(1), id(2)]);
    assert_eq!(sender.cumulative(), vec![id(0)]);

    assert!(matches!(tracker.close().await, Err(Error::TrackerClosed)));
    assert!(matches!(tracker.add(id(3)).await, Err(Error::TrackerClosed)));
    assert!(matches!(
        tracker.is_duplicate(id(3)).await,
        Err(Error::TrackerClosed)
    ));
    assert_eq!(sender.individual().len(), 2);
}

#[tokio::test]
async fn test_cumulative_flushed_immediately_without_time_flush() {
    let sender = Arc::new(RecordingAckSender::default());
    let tracker = new_ack_grouping_tracker(Some(options(2, Duration::ZERO)), sender.clone());

    tracker.add_cumulative(id(1)).await.unwrap();
    tracker.add_cumulative(id(2)).await.unwrap();

    let observed = sender.clone();
    eventually(move || observed.cumulative().last() == Some(&id(2))).await;
    assert_eq!(sender.cumulative(), vec![id(1), id(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_time_flush() {
    let (tracker, sender) = grouped(10, Duration::from_millis(100));

    tracker.add(id(1)).await.unwrap();
    tracker.add_cumulative(id(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(tracker.snapshot(None).await.unwrap().buffered, 0);
    assert_eq!(sender.individual(), vec![id(1)]);
    assert_eq!(sender.cumulative(), vec![id(0)]);
}

#[tokio::test(start_paused = true)]
async fn test_time_flush_resumes_after_explicit_flush() {
    let (tracker, sender) = grouped(10, Duration::from_millis(100));

    tracker.flush().await.unwrap();
    tracker.add(id(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(tracker.snapshot(None).await.unwrap().buffered, 0);
    assert_eq!(sender.individual(), vec![id(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_no_time_flush_when_disabled() {
    let (tracker, sender) = grouped(10, Duration::ZERO);

    tracker.add(id(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(tracker.snapshot(None).await.unwrap().buffered, 1);
    assert!(sender.individual().is_empty());

    tracker.flush().await.unwrap();
    assert_eq!(sender.individual(), vec![id(1)]);
}

#[tokio::test]
async fn test_dropping_the_tracker_flushes() {
    let sender = Arc::new(RecordingAckSender::default());
    let tracker = new_ack_grouping_tracker(Some(options(10, HOUR)), sender.clone());

    tracker.add(id(5)).await.unwrap();
    drop(tracker);

    let observed = sender.clone();
    eventually(move || observed.individual() == vec![id(5)]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers() {
    let sender = Arc::new(RecordingAckSender::default());
    let tracker = new_ack_grouping_tracker(Some(options(7, HOUR)), sender.clone());

    let tasks: Vec<_> = (0..4)
        .map(|task| {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                for n in 0..25 {
                    let id = id(task * 100 + n);
                    tracker.add(id).await.unwrap();
                    // Interleaved flushes may already have dropped the id.
                    tracker.is_duplicate(id).await.unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    tracker.close().await.unwrap();

    let acked = sender.individual();
    assert_eq!(acked.len(), 100);
    assert_eq!(acked.iter().collect::<HashSet<_>>().len(), 100);
}
