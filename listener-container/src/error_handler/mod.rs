use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::consumer::ConsumerClient;
use crate::error::{ClientError, ListenerError, RecoveryError};
use crate::types::{ConsumerRecord, Partition};

pub mod backoff;
pub mod classifier;
pub mod default;
pub mod recoverer;

pub use backoff::{BackOff, ExponentialBackOff, FixedBackOff};
pub use classifier::{DefaultErrorClassifier, ErrorClassifier};
pub use default::DefaultErrorHandler;
pub use recoverer::{ConsumerRecordRecoverer, DeadLetterPublishingRecoverer, LoggingRecoverer};

/// What an error handler may touch while handling a failure.
pub struct ErrorContext<'a> {
    pub consumer: &'a dyn ConsumerClient,
    pub stop: &'a CancellationToken,
    /// Commit the offset of a recovered record right away.
    pub ack_after_handle: bool,
}

/// Decides what happens after a listener fails.
///
/// Handlers reposition the consumer themselves: records they do not mark as
/// handled must be sought back so the next poll redelivers them. Returning an
/// error is fatal to the consumer task.
#[async_trait]
pub trait CommonErrorHandler: Send + Sync {
    /// A record listener failed on `failed`; `remaining` are the records of
    /// the same poll that were not delivered yet.
    async fn handle_remaining(
        &self,
        error: &ListenerError,
        failed: &ConsumerRecord,
        remaining: &[ConsumerRecord],
        ctx: &ErrorContext<'_>,
    ) -> Result<(), RecoveryError>;

    /// A batch listener failed on `records` as a whole.
    async fn handle_batch(
        &self,
        error: &ListenerError,
        records: &[ConsumerRecord],
        ctx: &ErrorContext<'_>,
    ) -> Result<(), RecoveryError>;
}

/// Lowest offset per partition, in first-seen partition order.
pub(crate) fn earliest_offsets<'a>(
    records: impl IntoIterator<Item = &'a ConsumerRecord>,
) -> Vec<(Partition, i64)> {
    let mut earliest: Vec<(Partition, i64)> = Vec::new();
    for record in records {
        let partition = record.topic_partition();
        match earliest.iter_mut().find(|(p, _)| *p == partition) {
            Some((_, offset)) => *offset = (*offset).min(record.offset),
            None => earliest.push((partition, record.offset)),
        }
    }
    earliest
}

/// Highest offset + 1 per partition, the position to commit once all
/// `records` are handled.
pub(crate) fn next_offsets<'a>(
    records: impl IntoIterator<Item = &'a ConsumerRecord>,
) -> Vec<(Partition, i64)> {
    let mut next: Vec<(Partition, i64)> = Vec::new();
    for record in records {
        let partition = record.topic_partition();
        match next.iter_mut().find(|(p, _)| *p == partition) {
            Some((_, offset)) => *offset = (*offset).max(record.offset + 1),
            None => next.push((partition, record.offset + 1)),
        }
    }
    next
}

/// Seek each partition back to the first of `records`, so they are fetched again.
pub fn seek_to_earliest<'a>(
    consumer: &dyn ConsumerClient,
    records: impl IntoIterator<Item = &'a ConsumerRecord>,
) -> Result<(), ClientError> {
    for (partition, offset) in earliest_offsets(records) {
        consumer.seek(&partition, offset)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_tracked_per_partition() {
        let records = vec![
            ConsumerRecord::new("orders", 1, 7),
            ConsumerRecord::new("orders", 0, 3),
            ConsumerRecord::new("orders", 1, 8),
            ConsumerRecord::new("orders", 0, 4),
        ];

        assert_eq!(
            earliest_offsets(&records),
            vec![
                (Partition::new("orders", 1), 7),
                (Partition::new("orders", 0), 3)
            ]
        );
        assert_eq!(
            next_offsets(&records),
            vec![
                (Partition::new("orders", 1), 9),
                (Partition::new("orders", 0), 5)
            ]
        );
    }
}
