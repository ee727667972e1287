use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::backoff::{BackOff, FixedBackOff};
use super::classifier::{DefaultErrorClassifier, ErrorClassifier};
use super::recoverer::ConsumerRecordRecoverer;
use super::{next_offsets, seek_to_earliest, CommonErrorHandler, ErrorContext};
use crate::consumer::CommitMode;
use crate::error::{ListenerError, RecoveryError};
use crate::types::{ConsumerRecord, Partition};

#[derive(Debug, Clone, Copy)]
struct FailedRecord {
    offset: i64,
    failures: u32,
}

/// Consecutive failures of the record at the head of each partition. A
/// failure at a different offset starts the count over.
#[derive(Default)]
pub struct FailedRecordTracker {
    failures: Mutex<HashMap<Partition, FailedRecord>>,
}

impl FailedRecordTracker {
    /// Count one more failure for `record` and return the total so far.
    pub fn record_failure(&self, record: &ConsumerRecord) -> u32 {
        let mut failures = self.failures.lock();
        let entry = failures
            .entry(record.topic_partition())
            .or_insert(FailedRecord {
                offset: record.offset,
                failures: 0,
            });
        if entry.offset != record.offset {
            *entry = FailedRecord {
                offset: record.offset,
                failures: 0,
            };
        }
        entry.failures += 1;
        entry.failures
    }

    pub fn clear(&self, record: &ConsumerRecord) {
        self.failures.lock().remove(&record.topic_partition());
    }

    pub fn failures(&self, record: &ConsumerRecord) -> u32 {
        self.failures
            .lock()
            .get(&record.topic_partition())
            .filter(|failed| failed.offset == record.offset)
            .map(|failed| failed.failures)
            .unwrap_or(0)
    }
}

/// Redelivers failed records by seeking back to them, pausing between
/// attempts as the [`BackOff`] dictates. Once retries are exhausted, or the
/// error is not retryable, the record goes to the recoverer and the consumer
/// moves past it.
pub struct DefaultErrorHandler {
    recoverer: Arc<dyn ConsumerRecordRecoverer>,
    backoff: Arc<dyn BackOff>,
    classifier: Arc<dyn ErrorClassifier>,
    tracker: FailedRecordTracker,
}

impl DefaultErrorHandler {
    pub fn new(recoverer: Arc<dyn ConsumerRecordRecoverer>, backoff: Arc<dyn BackOff>) -> Self {
        Self {
            recoverer,
            backoff,
            classifier: Arc::new(DefaultErrorClassifier::new()),
            tracker: FailedRecordTracker::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn tracker(&self) -> &FailedRecordTracker {
        &self.tracker
    }

    /// The redelivery delay, or `None` when the record should be recovered.
    fn retry_delay(&self, error: &ListenerError, record: &ConsumerRecord) -> Option<Duration> {
        let failures = self.tracker.record_failure(record);
        if !self.classifier.is_retryable(error) {
            warn!(record = %record, error = %error, "error is not retryable, recovering");
            return None;
        }
        let delay = self.backoff.next_backoff(failures);
        if delay.is_none() {
            warn!(record = %record, failures, error = %error, "retries exhausted, recovering");
        }
        delay
    }

    fn commit_handled<'a>(
        &self,
        records: impl IntoIterator<Item = &'a ConsumerRecord>,
        ctx: &ErrorContext<'_>,
    ) {
        if !ctx.ack_after_handle {
            return;
        }
        for (partition, next) in next_offsets(records) {
            if let Err(e) = ctx.consumer.store_offset(&partition, next) {
                warn!(
                    partition = %partition,
                    offset = next,
                    error = %e,
                    "failed to store offset of recovered record"
                );
            }
        }
        if let Err(e) = ctx.consumer.commit(CommitMode::Sync) {
            warn!(error = %e, "failed to commit offsets of recovered records");
        }
    }
}

impl Default for DefaultErrorHandler {
    fn default() -> Self {
        Self::new(
            Arc::new(super::recoverer::LoggingRecoverer),
            Arc::new(FixedBackOff::default()),
        )
    }
}

async fn sleep_unless_stopped(delay: Duration, stop: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = stop.cancelled() => {
            info!("stop requested during backoff");
        }
    }
}

#[async_trait]
impl CommonErrorHandler for DefaultErrorHandler {
    async fn handle_remaining(
        &self,
        error: &ListenerError,
        failed: &ConsumerRecord,
        remaining: &[ConsumerRecord],
        ctx: &ErrorContext<'_>,
    ) -> Result<(), RecoveryError> {
        if let Some(delay) = self.retry_delay(error, failed) {
            warn!(record = %failed, ?delay, error = %error, "listener failed, will redeliver");
            // Reposition before sleeping so a stop during the backoff leaves
            // the failed record uncommitted
            seek_to_earliest(ctx.consumer, std::iter::once(failed).chain(remaining))?;
            sleep_unless_stopped(delay, ctx.stop).await;
            return Ok(());
        }

        self.recoverer.recover(failed, error).await?;
        self.tracker.clear(failed);
        self.commit_handled(std::iter::once(failed), ctx);
        seek_to_earliest(ctx.consumer, remaining)?;
        Ok(())
    }

    async fn handle_batch(
        &self,
        error: &ListenerError,
        records: &[ConsumerRecord],
        ctx: &ErrorContext<'_>,
    ) -> Result<(), RecoveryError> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        if let Some(delay) = self.retry_delay(error, first) {
            warn!(
                batch_start = %first,
                size = records.len(),
                ?delay,
                error = %error,
                "batch listener failed, will redeliver"
            );
            seek_to_earliest(ctx.consumer, records)?;
            sleep_unless_stopped(delay, ctx.stop).await;
            return Ok(());
        }

        for record in records {
            self.recoverer.recover(record, error).await?;
        }
        self.tracker.clear(first);
        self.commit_handled(records, ctx);
        Ok(())
    }
}
