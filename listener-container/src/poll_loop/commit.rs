use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::consumer::{CommitMode, ConsumerClient};
use crate::error_handler::next_offsets;
use crate::properties::{AckMode, ContainerProperties};
use crate::types::{ConsumerRecord, Partition};

/// Stores offsets as records are processed and commits them when the ack mode
/// says so. Store and commit failures are logged, never fatal: an offset that
/// did not make it is committed with the next one, or the record is
/// redelivered.
pub(crate) struct OffsetCommitter {
    ack_mode: AckMode,
    ack_count: usize,
    ack_time: Duration,
    since_commit: usize,
    last_commit: Instant,
    dirty: bool,
}

impl OffsetCommitter {
    pub fn new(properties: &ContainerProperties) -> Self {
        Self {
            ack_mode: properties.ack_mode(),
            ack_count: properties.ack_count(),
            ack_time: properties.ack_time(),
            since_commit: 0,
            last_commit: Instant::now(),
            dirty: false,
        }
    }

    /// A record listener returned, a record was vetoed, or a handler recovered it.
    pub fn record_processed(&mut self, consumer: &dyn ConsumerClient, record: &ConsumerRecord) {
        if self.ack_mode.is_manual() {
            return;
        }
        self.store(consumer, &record.topic_partition(), record.offset + 1);
        self.since_commit += 1;
        if self.ack_mode == AckMode::Record {
            self.commit(consumer);
        }
    }

    pub fn batch_processed(&mut self, consumer: &dyn ConsumerClient, records: &[ConsumerRecord]) {
        if self.ack_mode.is_manual() || records.is_empty() {
            return;
        }
        for (partition, next) in next_offsets(records) {
            self.store(consumer, &partition, next);
        }
        self.since_commit += records.len();
    }

    /// Offsets a listener acknowledged through its [`Acknowledgment`](crate::acknowledgment::Acknowledgment).
    pub fn acknowledged(&mut self, consumer: &dyn ConsumerClient, offsets: Vec<(Partition, i64)>) {
        if offsets.is_empty() {
            return;
        }
        for (partition, next) in offsets {
            self.store(consumer, &partition, next);
        }
        if self.ack_mode == AckMode::ManualImmediate {
            self.commit(consumer);
        }
    }

    /// Called once per poll, after all polled records were dispatched.
    pub fn after_poll(&mut self, consumer: &dyn ConsumerClient) {
        if !self.dirty {
            return;
        }
        let due = match self.ack_mode {
            AckMode::Record | AckMode::ManualImmediate => false,
            AckMode::Batch | AckMode::Manual => true,
            AckMode::Count => self.since_commit >= self.ack_count,
            AckMode::Time => self.last_commit.elapsed() >= self.ack_time,
            AckMode::CountTime => {
                self.since_commit >= self.ack_count || self.last_commit.elapsed() >= self.ack_time
            }
        };
        if due {
            self.commit(consumer);
        }
    }

    pub fn flush(&mut self, consumer: &dyn ConsumerClient) {
        if self.dirty {
            self.commit(consumer);
        }
    }

    fn store(&mut self, consumer: &dyn ConsumerClient, partition: &Partition, next: i64) {
        match consumer.store_offset(partition, next) {
            Ok(()) => self.dirty = true,
            Err(e) => warn!(partition = %partition, offset = next, error = %e, "failed to store offset"),
        }
    }

    fn commit(&mut self, consumer: &dyn ConsumerClient) {
        match consumer.commit(CommitMode::Sync) {
            Ok(()) => {
                debug!(records = self.since_commit, ack_mode = ?self.ack_mode, "committed offsets");
                self.since_commit = 0;
                self.dirty = false;
                self.last_commit = Instant::now();
            }
            Err(e) => warn!(error = %e, "offset commit failed, will retry with the next commit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::properties::DEFAULT_ACK_TIME;
    use crate::test_utils::{ConsumerCall, RecordingConsumerClient};

    fn committer(ack_mode: AckMode, ack_count: usize, ack_time: Duration) -> OffsetCommitter {
        let properties = ContainerProperties::builder()
            .topics(["orders"])
            .ack_mode(ack_mode)
            .ack_count(ack_count)
            .ack_time(ack_time)
            .build()
            .unwrap();
        OffsetCommitter::new(&properties)
    }

    fn commits(consumer: &RecordingConsumerClient) -> usize {
        consumer
            .calls()
            .iter()
            .filter(|call| **call == ConsumerCall::Commit)
            .count()
    }

    #[rstest]
    #[case(AckMode::Record, 3, 0)]
    #[case(AckMode::Batch, 0, 1)]
    #[case(AckMode::Count, 0, 1)]
    #[case(AckMode::Time, 0, 0)]
    #[case(AckMode::CountTime, 0, 1)]
    #[case(AckMode::Manual, 0, 0)]
    fn commits_per_ack_mode(
        #[case] ack_mode: AckMode,
        #[case] during_dispatch: usize,
        #[case] after_poll: usize,
    ) {
        let consumer = RecordingConsumerClient::default();
        let mut committer = committer(ack_mode, 2, Duration::from_secs(3600));

        for offset in 0..3 {
            committer.record_processed(&consumer, &ConsumerRecord::new("orders", 0, offset));
        }
        assert_eq!(commits(&consumer), during_dispatch);

        committer.after_poll(&consumer);
        assert_eq!(commits(&consumer), during_dispatch + after_poll);
    }

    #[test]
    fn count_mode_waits_for_threshold() {
        let consumer = RecordingConsumerClient::default();
        let mut committer = committer(AckMode::Count, 3, Duration::from_secs(3600));

        committer.record_processed(&consumer, &ConsumerRecord::new("orders", 0, 0));
        committer.after_poll(&consumer);
        assert_eq!(commits(&consumer), 0);

        committer.batch_processed(
            &consumer,
            &[
                ConsumerRecord::new("orders", 0, 1),
                ConsumerRecord::new("orders", 0, 2),
            ],
        );
        committer.after_poll(&consumer);
        assert_eq!(commits(&consumer), 1);

        // nothing new stored, nothing to commit
        committer.after_poll(&consumer);
        assert_eq!(commits(&consumer), 1);
    }

    #[test]
    fn time_mode_commits_once_interval_elapsed() {
        let consumer = RecordingConsumerClient::default();
        let mut committer = committer(AckMode::Time, 1, Duration::ZERO);

        committer.record_processed(&consumer, &ConsumerRecord::new("orders", 0, 0));
        committer.after_poll(&consumer);
        assert_eq!(commits(&consumer), 1);
    }

    #[test]
    fn manual_immediate_commits_on_acknowledge() {
        let consumer = RecordingConsumerClient::default();
        let mut committer = committer(AckMode::ManualImmediate, 1, DEFAULT_ACK_TIME);
        let p0 = Partition::new("orders", 0);

        committer.record_processed(&consumer, &ConsumerRecord::new("orders", 0, 0));
        assert!(consumer.calls().is_empty());

        committer.acknowledged(&consumer, vec![(p0.clone(), 1)]);
        assert_eq!(
            consumer.calls(),
            vec![ConsumerCall::StoreOffset(p0, 1), ConsumerCall::Commit]
        );
    }

    #[test]
    fn flush_commits_only_pending_offsets() {
        let consumer = RecordingConsumerClient::default();
        let mut committer = committer(AckMode::Count, 100, DEFAULT_ACK_TIME);

        committer.flush(&consumer);
        assert_eq!(commits(&consumer), 0);

        committer.record_processed(&consumer, &ConsumerRecord::new("orders", 0, 7));
        committer.flush(&consumer);
        assert_eq!(
            consumer.calls(),
            vec![
                ConsumerCall::StoreOffset(Partition::new("orders", 0), 8),
                ConsumerCall::Commit
            ]
        );
    }
}
