use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::commit::OffsetCommitter;
use super::{LoopContext, PollLoop, PollLoopFactory, PollLoopRequest};
use crate::acknowledgment::{AckQueue, Acknowledgment};
use crate::consumer::{ConsumerClient, ConsumerRequest};
use crate::error::{ClientError, ContainerError, ListenerError};
use crate::error_handler::{seek_to_earliest, CommonErrorHandler, DefaultErrorHandler, ErrorContext};
use crate::events::ContainerEvent;
use crate::interceptor::{BatchInterceptor, RecordInterceptor};
use crate::listener::{
    AcknowledgingBatchListener, AcknowledgingRecordListener, BatchListener, MessageListener,
    RecordListener,
};
use crate::properties::{AckMode, ContainerProperties, TopicSelection};
use crate::rebalance::RebalanceTracker;
use crate::transaction::TransactionDemarcation;
use crate::types::{ConsumerRecord, Partition};

const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const MAX_POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Builds a [`ListenerPollLoop`] on every container start. The error handler,
/// interceptors and transaction producer outlive individual starts.
pub struct ListenerPollLoopFactory {
    error_handler: Arc<dyn CommonErrorHandler>,
    record_interceptor: Option<Arc<dyn RecordInterceptor>>,
    batch_interceptor: Option<Arc<dyn BatchInterceptor>>,
    transaction: Option<Arc<dyn TransactionDemarcation>>,
}

impl Default for ListenerPollLoopFactory {
    fn default() -> Self {
        Self {
            error_handler: Arc::new(DefaultErrorHandler::default()),
            record_interceptor: None,
            batch_interceptor: None,
            transaction: None,
        }
    }
}

impl ListenerPollLoopFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_handler(mut self, error_handler: Arc<dyn CommonErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    pub fn with_record_interceptor(mut self, interceptor: Arc<dyn RecordInterceptor>) -> Self {
        self.record_interceptor = Some(interceptor);
        self
    }

    pub fn with_batch_interceptor(mut self, interceptor: Arc<dyn BatchInterceptor>) -> Self {
        self.batch_interceptor = Some(interceptor);
        self
    }

    pub fn with_transaction(mut self, transaction: Arc<dyn TransactionDemarcation>) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

impl ListenerPollLoopFactory {
    fn assemble(
        &self,
        consumer: Box<dyn ConsumerClient>,
        properties: Arc<ContainerProperties>,
        listener: MessageListener,
        rebalance: Arc<RebalanceTracker>,
    ) -> ListenerPollLoop {
        ListenerPollLoop {
            consumer,
            committer: OffsetCommitter::new(&properties),
            properties,
            target: Target::from(listener),
            error_handler: self.error_handler.clone(),
            record_interceptor: self.record_interceptor.clone(),
            batch_interceptor: self.batch_interceptor.clone(),
            transaction: self.transaction.clone(),
            rebalance,
            acks: AckQueue::new(),
            started: false,
            container_paused: false,
            paused_partitions: HashSet::new(),
            seen_generation: 0,
            poll_errors: 0,
        }
    }
}

impl PollLoopFactory for ListenerPollLoopFactory {
    fn create(&self, request: PollLoopRequest) -> Result<Box<dyn PollLoop>, ContainerError> {
        let rebalance = Arc::new(RebalanceTracker::new(request.rebalance_listener));
        let consumer = request.consumer_factory.create_consumer(ConsumerRequest {
            group_id: request.group_id,
            client_id: Some(request.container),
            overrides: request.properties.consumer_overrides().clone(),
            rebalance_listener: rebalance.clone(),
        })?;

        Ok(Box::new(self.assemble(
            consumer,
            request.properties,
            request.listener,
            rebalance,
        )))
    }
}

enum RecordTarget {
    Plain(Arc<dyn RecordListener>),
    Acknowledging(Arc<dyn AcknowledgingRecordListener>),
}

enum BatchTarget {
    Plain(Arc<dyn BatchListener>),
    Acknowledging(Arc<dyn AcknowledgingBatchListener>),
}

enum Target {
    Record(RecordTarget),
    Batch(BatchTarget),
}

impl From<MessageListener> for Target {
    fn from(listener: MessageListener) -> Self {
        match listener {
            MessageListener::Record(l) => Target::Record(RecordTarget::Plain(l)),
            MessageListener::AcknowledgingRecord(l) => {
                Target::Record(RecordTarget::Acknowledging(l))
            }
            MessageListener::Batch(l) => Target::Batch(BatchTarget::Plain(l)),
            MessageListener::AcknowledgingBatch(l) => Target::Batch(BatchTarget::Acknowledging(l)),
        }
    }
}

/// The standard consumer task: poll, dispatch to the listener, hand failures
/// to the error handler, commit per ack mode, and keep pause requests applied.
pub struct ListenerPollLoop {
    consumer: Box<dyn ConsumerClient>,
    properties: Arc<ContainerProperties>,
    target: Target,
    error_handler: Arc<dyn CommonErrorHandler>,
    record_interceptor: Option<Arc<dyn RecordInterceptor>>,
    batch_interceptor: Option<Arc<dyn BatchInterceptor>>,
    transaction: Option<Arc<dyn TransactionDemarcation>>,
    rebalance: Arc<RebalanceTracker>,
    committer: OffsetCommitter,
    acks: Arc<AckQueue>,
    started: bool,
    container_paused: bool,
    // partitions this loop has paused on request, as opposed to by a container pause
    paused_partitions: HashSet<Partition>,
    seen_generation: u64,
    poll_errors: u32,
}

#[async_trait]
impl PollLoop for ListenerPollLoop {
    async fn run_once(&mut self, ctx: &LoopContext) -> Result<(), ContainerError> {
        if !self.started {
            self.subscribe()?;
            self.started = true;
            info!(selection = ?self.properties.topic_selection(), "consumer started");
            ctx.publish(ContainerEvent::ConsumerStarted {
                container: ctx.container().to_string(),
            });
        }

        self.reapply_pauses_after_rebalance()?;
        self.apply_container_pause(ctx)?;
        self.reconcile_partition_pauses(ctx)?;

        let records = match self
            .consumer
            .poll(
                self.properties.poll_timeout(),
                self.properties.max_poll_records(),
            )
            .await
        {
            Ok(records) => {
                self.poll_errors = 0;
                records
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                self.poll_errors = self.poll_errors.saturating_add(1);
                let delay = POLL_ERROR_BACKOFF
                    .saturating_mul(self.poll_errors)
                    .min(MAX_POLL_ERROR_BACKOFF);
                warn!(error = %e, attempt = self.poll_errors, ?delay, "poll failed");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.stop_token().cancelled() => {}
                }
                return Ok(());
            }
        };

        if !records.is_empty() {
            debug!(count = records.len(), "polled records");
            if matches!(self.target, Target::Batch(_)) {
                self.dispatch_batches(records, ctx).await?;
            } else {
                self.dispatch_records(records, ctx).await?;
            }
        }

        self.commit_acknowledged();
        self.committer.after_poll(self.consumer.as_ref());
        Ok(())
    }

    async fn shutdown(&mut self, _ctx: &LoopContext) {
        self.commit_acknowledged();
        self.committer.flush(self.consumer.as_ref());
        self.consumer.close();
        info!("consumer stopped");
    }
}

impl ListenerPollLoop {
    fn subscribe(&self) -> Result<(), ClientError> {
        match self.properties.topic_selection() {
            TopicSelection::Topics(topics) => self.consumer.subscribe(topics),
            TopicSelection::Pattern(pattern) => self.consumer.subscribe_pattern(pattern),
            TopicSelection::Partitions(partitions) => self.consumer.assign(partitions),
        }
    }

    /// A rebalance resets the pause state of the new assignment, so pauses are
    /// applied again. Revoked partitions are forgotten.
    fn reapply_pauses_after_rebalance(&mut self) -> Result<(), ClientError> {
        let generation = self.rebalance.generation();
        if generation == self.seen_generation {
            return Ok(());
        }
        self.seen_generation = generation;

        let assignment = self.consumer.assignment()?;
        self.paused_partitions.retain(|p| assignment.contains(p));
        let to_pause: Vec<Partition> = if self.container_paused {
            assignment
        } else {
            self.paused_partitions.iter().cloned().collect()
        };
        if !to_pause.is_empty() {
            debug!(partitions = ?to_pause, "re-pausing after rebalance");
            self.consumer.pause(&to_pause)?;
        }
        Ok(())
    }

    fn apply_container_pause(&mut self, ctx: &LoopContext) -> Result<(), ClientError> {
        let requested = ctx.is_pause_requested();
        if requested == self.container_paused {
            return Ok(());
        }

        let assignment = self.consumer.assignment()?;
        if requested {
            self.consumer.pause(&assignment)?;
            self.container_paused = true;
            info!(partitions = ?assignment, "consumer paused");
            ctx.publish(ContainerEvent::ConsumerPaused {
                container: ctx.container().to_string(),
                partitions: assignment,
            });
        } else {
            // partitions paused on their own stay paused
            let to_resume: Vec<Partition> = assignment
                .into_iter()
                .filter(|p| !ctx.pause_registry().is_pause_requested(p))
                .collect();
            self.consumer.resume(&to_resume)?;
            self.container_paused = false;
            info!(partitions = ?to_resume, "consumer resumed");
            ctx.publish(ContainerEvent::ConsumerResumed {
                container: ctx.container().to_string(),
                partitions: to_resume,
            });
        }
        Ok(())
    }

    fn reconcile_partition_pauses(&mut self, ctx: &LoopContext) -> Result<(), ClientError> {
        let registry = ctx.pause_registry();
        if self.paused_partitions.is_empty() && registry.requested().is_empty() {
            return Ok(());
        }

        for partition in self.consumer.assignment()? {
            let requested = registry.is_pause_requested(&partition);
            let applied = self.paused_partitions.contains(&partition);
            if requested && !applied {
                if !self.container_paused {
                    self.consumer.pause(std::slice::from_ref(&partition))?;
                }
                info!(partition = %partition, "partition paused");
                self.paused_partitions.insert(partition.clone());
                ctx.publish(ContainerEvent::PartitionPaused {
                    container: ctx.container().to_string(),
                    partition,
                });
            } else if !requested && applied {
                if !self.container_paused {
                    self.consumer.resume(std::slice::from_ref(&partition))?;
                }
                info!(partition = %partition, "partition resumed");
                self.paused_partitions.remove(&partition);
                ctx.publish(ContainerEvent::PartitionResumed {
                    container: ctx.container().to_string(),
                    partition,
                });
            }
        }
        Ok(())
    }

    fn commit_acknowledged(&mut self) {
        let acknowledged = self.acks.drain();
        self.committer
            .acknowledged(self.consumer.as_ref(), acknowledged);
    }

    fn error_context<'a>(&'a self, ctx: &'a LoopContext) -> ErrorContext<'a> {
        ErrorContext {
            consumer: self.consumer.as_ref(),
            stop: ctx.stop_token(),
            ack_after_handle: self.properties.ack_after_handle(),
        }
    }

    async fn dispatch_records(
        &mut self,
        records: Vec<ConsumerRecord>,
        ctx: &LoopContext,
    ) -> Result<(), ContainerError> {
        for (index, record) in records.iter().enumerate() {
            if let Err(error) = self.deliver_record(record.clone()).await? {
                self.error_handler
                    .handle_remaining(
                        &error,
                        record,
                        &records[index + 1..],
                        &self.error_context(ctx),
                    )
                    .await?;
                return Ok(());
            }
            self.committer
                .record_processed(self.consumer.as_ref(), record);
            if self.properties.ack_mode() == AckMode::ManualImmediate {
                self.commit_acknowledged();
            }
        }
        Ok(())
    }

    /// One record through interceptor, transaction and listener. The outer
    /// error is fatal to the task; the inner one goes to the error handler.
    async fn deliver_record(
        &self,
        record: ConsumerRecord,
    ) -> Result<Result<(), ListenerError>, ContainerError> {
        let before_tx = self.properties.intercept_before_tx();
        let mut record = record;

        if before_tx {
            match self.intercept_record(record) {
                Some(intercepted) => record = intercepted,
                None => return Ok(Ok(())),
            }
        }
        self.begin_transaction()?;
        if !before_tx {
            match self.intercept_record(record) {
                Some(intercepted) => record = intercepted,
                None => {
                    return Ok(self.commit_transaction());
                }
            }
        }

        let mut result = self.invoke_record_listener(&record).await;
        if result.is_ok() {
            result = self.commit_transaction();
        } else {
            self.abort_transaction();
        }

        if let Some(interceptor) = &self.record_interceptor {
            match &result {
                Ok(()) => interceptor.success(&record),
                Err(e) => interceptor.failure(&record, e),
            }
            interceptor.after_record(&record);
        }
        Ok(result)
    }

    fn intercept_record(&self, record: ConsumerRecord) -> Option<ConsumerRecord> {
        let Some(interceptor) = &self.record_interceptor else {
            return Some(record);
        };
        let shown = record.to_string();
        let intercepted = interceptor.intercept(record);
        if intercepted.is_none() {
            debug!(record = %shown, "record vetoed by interceptor");
        }
        intercepted
    }

    async fn invoke_record_listener(&self, record: &ConsumerRecord) -> Result<(), ListenerError> {
        match &self.target {
            Target::Record(RecordTarget::Plain(listener)) => listener.on_record(record).await,
            Target::Record(RecordTarget::Acknowledging(listener)) => {
                let ack =
                    Acknowledgment::for_records(std::slice::from_ref(record), self.acks.clone());
                listener.on_record(record, ack).await
            }
            Target::Batch(_) => self.invoke_batch_listener(std::slice::from_ref(record)).await,
        }
    }

    async fn dispatch_batches(
        &mut self,
        records: Vec<ConsumerRecord>,
        ctx: &LoopContext,
    ) -> Result<(), ContainerError> {
        let batches = if self.properties.sub_batch_per_partition() {
            split_by_partition(records)
        } else {
            vec![records]
        };

        for (index, batch) in batches.iter().enumerate() {
            if let Err(error) = self.deliver_batch(batch.clone()).await? {
                // sub-batches after the failed one were fetched but never delivered
                seek_to_earliest(self.consumer.as_ref(), batches[index + 1..].iter().flatten())?;
                self.handle_batch_error(&error, batch, ctx).await?;
                return Ok(());
            }
            self.committer
                .batch_processed(self.consumer.as_ref(), batch);
            if self.properties.ack_mode() == AckMode::ManualImmediate {
                self.commit_acknowledged();
            }
        }
        Ok(())
    }

    async fn handle_batch_error(
        &mut self,
        error: &ListenerError,
        batch: &[ConsumerRecord],
        ctx: &LoopContext,
    ) -> Result<(), ContainerError> {
        match error.failed_index().filter(|index| *index < batch.len()) {
            Some(index) => {
                debug!(index, size = batch.len(), "batch failed part way through");
                self.committer
                    .batch_processed(self.consumer.as_ref(), &batch[..index]);
                self.error_handler
                    .handle_remaining(
                        error,
                        &batch[index],
                        &batch[index + 1..],
                        &self.error_context(ctx),
                    )
                    .await?;
            }
            None => {
                self.error_handler
                    .handle_batch(error, batch, &self.error_context(ctx))
                    .await?;
            }
        }
        Ok(())
    }

    async fn deliver_batch(
        &self,
        records: Vec<ConsumerRecord>,
    ) -> Result<Result<(), ListenerError>, ContainerError> {
        let before_tx = self.properties.intercept_before_tx();
        let mut records = records;

        if before_tx {
            match self.intercept_batch(records) {
                Some(intercepted) => records = intercepted,
                None => return Ok(Ok(())),
            }
        }
        self.begin_transaction()?;
        if !before_tx {
            match self.intercept_batch(records) {
                Some(intercepted) => records = intercepted,
                None => {
                    return Ok(self.commit_transaction());
                }
            }
        }

        let mut result = self.invoke_batch_listener(&records).await;
        if result.is_ok() {
            result = self.commit_transaction();
        } else {
            self.abort_transaction();
        }

        if let Some(interceptor) = &self.batch_interceptor {
            match &result {
                Ok(()) => interceptor.success(&records),
                Err(e) => interceptor.failure(&records, e),
            }
        }
        Ok(result)
    }

    fn intercept_batch(&self, records: Vec<ConsumerRecord>) -> Option<Vec<ConsumerRecord>> {
        let Some(interceptor) = &self.batch_interceptor else {
            return Some(records);
        };
        let size = records.len();
        let intercepted = interceptor.intercept(records);
        if intercepted.is_none() {
            debug!(size, "batch vetoed by interceptor");
        }
        intercepted
    }

    async fn invoke_batch_listener(&self, records: &[ConsumerRecord]) -> Result<(), ListenerError> {
        match &self.target {
            Target::Batch(BatchTarget::Plain(listener)) => listener.on_batch(records).await,
            Target::Batch(BatchTarget::Acknowledging(listener)) => {
                let ack = Acknowledgment::for_records(records, self.acks.clone());
                listener.on_batch(records, ack).await
            }
            Target::Record(RecordTarget::Plain(listener)) => {
                for record in records {
                    listener.on_record(record).await?;
                }
                Ok(())
            }
            Target::Record(RecordTarget::Acknowledging(listener)) => {
                for record in records {
                    let ack =
                        Acknowledgment::for_records(std::slice::from_ref(record), self.acks.clone());
                    listener.on_record(record, ack).await?;
                }
                Ok(())
            }
        }
    }

    fn begin_transaction(&self) -> Result<(), ContainerError> {
        match &self.transaction {
            Some(tx) => tx.begin().map_err(ContainerError::Transaction),
            None => Ok(()),
        }
    }

    /// A failed commit is reported like a listener failure, so the records are
    /// retried or recovered.
    fn commit_transaction(&self) -> Result<(), ListenerError> {
        let Some(tx) = &self.transaction else {
            return Ok(());
        };
        tx.commit().map_err(|e| {
            warn!(error = %e, "transaction commit failed");
            self.abort_transaction();
            ListenerError::retryable(e)
        })
    }

    fn abort_transaction(&self) {
        if let Some(tx) = &self.transaction {
            if let Err(e) = tx.abort() {
                warn!(error = %e, "transaction abort failed");
            }
        }
    }
}

/// Group records by partition, keeping the order partitions first appear in.
fn split_by_partition(records: Vec<ConsumerRecord>) -> Vec<Vec<ConsumerRecord>> {
    let mut batches: Vec<(Partition, Vec<ConsumerRecord>)> = Vec::new();
    for record in records {
        let partition = record.topic_partition();
        match batches.iter_mut().find(|(p, _)| *p == partition) {
            Some((_, batch)) => batch.push(record),
            None => batches.push((partition, vec![record])),
        }
    }
    batches.into_iter().map(|(_, batch)| batch).collect()
}
