//! In-memory doubles for the container's collaborators: a broker and consumer
//! that behave like a single-member consumer group, recording listeners, an
//! event publisher and a recoverer. Used by unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use regex::Regex;
use tokio::time::Instant;

use crate::acknowledgment::Acknowledgment;
use crate::consumer::{CommitMode, ConsumerClient, ConsumerFactory, ConsumerRequest};
use crate::error::{ClientError, ErrorKind, ListenerError, RecoveryError};
use crate::error_handler::ConsumerRecordRecoverer;
use crate::events::{ContainerEvent, EventPublisher};
use crate::listener::{
    AcknowledgingBatchListener, AcknowledgingRecordListener, BatchListener, RecordListener,
};
use crate::rebalance::RebalanceListener;
use crate::topic_check::{AdminFactory, DescribeError, DescribeFuture, TopicDescriber};
use crate::types::{ConsumerRecord, Partition, TopicPartitionOffset};

const IDLE_POLL: Duration = Duration::from_millis(10);
const WAIT_STEP: Duration = Duration::from_millis(5);

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    /// The consumer keeps going after a short pause.
    Transient,
    /// The consumer task ends.
    Fatal,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<ConsumerRecord>>>,
    committed: HashMap<Partition, i64>,
    poll_failure: Option<PollFailure>,
}

/// Topics, partitions and committed offsets held in memory.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_topic(&self, topic: &str, partitions: usize) {
        self.state
            .lock()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions]);
    }

    /// Append a record and return its offset. The topic must exist.
    pub fn produce(&self, topic: &str, partition: i32, payload: &str) -> i64 {
        let mut state = self.state.lock();
        let log = state
            .topics
            .get_mut(topic)
            .and_then(|partitions| partitions.get_mut(usize::try_from(partition).ok()?))
            .unwrap_or_else(|| panic!("unknown partition {topic}-{partition}"));
        let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
        log.push(
            ConsumerRecord::new(topic, partition, offset).with_payload(payload.as_bytes().to_vec()),
        );
        offset
    }

    pub fn committed(&self, partition: &Partition) -> Option<i64> {
        self.state.lock().committed.get(partition).copied()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.state.lock().topics.contains_key(topic)
    }

    pub fn set_poll_failure(&self, failure: Option<PollFailure>) {
        self.state.lock().poll_failure = failure;
    }

    fn partitions<'a>(&self, topics: impl IntoIterator<Item = &'a str>) -> Vec<Partition> {
        let state = self.state.lock();
        let mut partitions = Vec::new();
        for topic in topics {
            if let Some(logs) = state.topics.get(topic) {
                for number in 0..logs.len() {
                    partitions.push(Partition::new(topic, i32::try_from(number).unwrap_or(i32::MAX)));
                }
            }
        }
        partitions
    }

    fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().topics.keys().cloned().collect();
        names.sort();
        names
    }

    fn fetch(&self, partition: &Partition, from: i64, max: usize) -> Vec<ConsumerRecord> {
        let state = self.state.lock();
        let Some(log) = state
            .topics
            .get(partition.topic())
            .and_then(|logs| logs.get(usize::try_from(partition.partition_number()).ok()?))
        else {
            return Vec::new();
        };
        let start = usize::try_from(from.max(0)).unwrap_or(usize::MAX);
        log.iter().skip(start).take(max).cloned().collect()
    }

    fn commit(&self, offsets: &HashMap<Partition, i64>) {
        self.state
            .lock()
            .committed
            .extend(offsets.iter().map(|(p, o)| (p.clone(), *o)));
    }

    fn take_poll_failure(&self) -> Option<ClientError> {
        match self.state.lock().poll_failure {
            None => None,
            Some(PollFailure::Transient) => Some(ClientError::Kafka(KafkaError::Global(
                RDKafkaErrorCode::AllBrokersDown,
            ))),
            Some(PollFailure::Fatal) => Some(ClientError::Closed),
        }
    }
}

#[derive(Default)]
struct ConsumerState {
    group_id: Option<String>,
    client_id: Option<String>,
    subscribed: bool,
    pending_assignment: Option<Vec<Partition>>,
    assignment: Vec<Partition>,
    positions: HashMap<Partition, i64>,
    paused: HashSet<Partition>,
    stored: HashMap<Partition, i64>,
    closed: bool,
    polls: usize,
}

/// A consumer over an [`InMemoryBroker`]. Subscriptions are assigned every
/// partition of the matching topics on the first poll, with the rebalance
/// listener called as a real group join would.
#[derive(Clone)]
pub struct InMemoryConsumer {
    broker: Arc<InMemoryBroker>,
    rebalance: Arc<dyn RebalanceListener>,
    state: Arc<Mutex<ConsumerState>>,
}

impl InMemoryConsumer {
    pub fn group_id(&self) -> Option<String> {
        self.state.lock().group_id.clone()
    }

    pub fn client_id(&self) -> Option<String> {
        self.state.lock().client_id.clone()
    }

    pub fn paused(&self) -> Vec<Partition> {
        let mut paused: Vec<Partition> = self.state.lock().paused.iter().cloned().collect();
        paused.sort();
        paused
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    /// Drop the current assignment and assign it again, the way a group
    /// rebalance does. Client-side pause state is lost.
    pub fn rebalance(&self) {
        let revoked = {
            let mut state = self.state.lock();
            state.paused.clear();
            let revoked = state.assignment.clone();
            state.pending_assignment = Some(revoked.clone());
            revoked
        };
        self.rebalance.on_partitions_revoked(&revoked);
    }

    fn start_position(&self, partition: &Partition) -> i64 {
        self.broker.committed(partition).unwrap_or(0)
    }
}

#[async_trait]
impl ConsumerClient for InMemoryConsumer {
    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        let partitions = self.broker.partitions(topics.iter().map(String::as_str));
        let mut state = self.state.lock();
        state.subscribed = true;
        state.pending_assignment = Some(partitions);
        Ok(())
    }

    fn subscribe_pattern(&self, pattern: &Regex) -> Result<(), ClientError> {
        let topics: Vec<String> = self
            .broker
            .topic_names()
            .into_iter()
            .filter(|topic| pattern.is_match(topic))
            .collect();
        self.subscribe(&topics)
    }

    fn assign(&self, partitions: &[TopicPartitionOffset]) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        for tpo in partitions {
            let position = tpo
                .offset()
                .unwrap_or_else(|| self.start_position(tpo.partition()));
            state.positions.insert(tpo.partition().clone(), position);
            state.assignment.push(tpo.partition().clone());
        }
        Ok(())
    }

    async fn poll(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<ConsumerRecord>, ClientError> {
        if self.state.lock().closed {
            return Err(ClientError::Closed);
        }
        if let Some(error) = self.broker.take_poll_failure() {
            return Err(error);
        }

        let assigned = {
            let mut state = self.state.lock();
            state.polls += 1;
            match state.pending_assignment.take() {
                Some(partitions) => {
                    for partition in &partitions {
                        let position = self.start_position(partition);
                        state.positions.insert(partition.clone(), position);
                    }
                    state.assignment = partitions.clone();
                    Some(partitions)
                }
                None => None,
            }
        };
        if let Some(partitions) = assigned {
            self.rebalance.on_partitions_assigned(&partitions);
        }

        let records = {
            let mut state = self.state.lock();
            let mut records = Vec::new();
            for partition in state.assignment.clone() {
                if state.paused.contains(&partition) || records.len() >= max_records {
                    continue;
                }
                let position = state.positions.get(&partition).copied().unwrap_or(0);
                let fetched = self
                    .broker
                    .fetch(&partition, position, max_records - records.len());
                if let Some(last) = fetched.last() {
                    state.positions.insert(partition.clone(), last.offset + 1);
                }
                records.extend(fetched);
            }
            records
        };

        if records.is_empty() {
            tokio::time::sleep(timeout.min(IDLE_POLL)).await;
        }
        Ok(records)
    }

    fn seek(&self, partition: &Partition, offset: i64) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if !state.assignment.contains(partition) {
            return Err(ClientError::NotAssigned(partition.clone()));
        }
        state.positions.insert(partition.clone(), offset);
        Ok(())
    }

    fn store_offset(&self, partition: &Partition, next_offset: i64) -> Result<(), ClientError> {
        self.state
            .lock()
            .stored
            .insert(partition.clone(), next_offset);
        Ok(())
    }

    fn commit(&self, _mode: CommitMode) -> Result<(), ClientError> {
        let stored = std::mem::take(&mut self.state.lock().stored);
        self.broker.commit(&stored);
        Ok(())
    }

    fn pause(&self, partitions: &[Partition]) -> Result<(), ClientError> {
        self.state.lock().paused.extend(partitions.iter().cloned());
        Ok(())
    }

    fn resume(&self, partitions: &[Partition]) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        for partition in partitions {
            state.paused.remove(partition);
        }
        Ok(())
    }

    fn assignment(&self) -> Result<Vec<Partition>, ClientError> {
        Ok(self.state.lock().assignment.clone())
    }

    fn close(&self) {
        let revoked = {
            let mut state = self.state.lock();
            state.closed = true;
            if state.subscribed {
                std::mem::take(&mut state.assignment)
            } else {
                Vec::new()
            }
        };
        if !revoked.is_empty() {
            self.rebalance.on_partitions_revoked(&revoked);
        }
    }
}

/// Hands out [`InMemoryConsumer`]s over one broker and keeps them for inspection.
pub struct InMemoryConsumerFactory {
    broker: Arc<InMemoryBroker>,
    properties: HashMap<String, String>,
    consumers: Mutex<Vec<InMemoryConsumer>>,
}

impl Default for InMemoryConsumerFactory {
    fn default() -> Self {
        Self::new(InMemoryBroker::new())
    }
}

impl InMemoryConsumerFactory {
    pub fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            properties: HashMap::new(),
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn broker(&self) -> Arc<InMemoryBroker> {
        self.broker.clone()
    }

    pub fn consumers(&self) -> Vec<InMemoryConsumer> {
        self.consumers.lock().clone()
    }

    pub fn last_consumer(&self) -> Option<InMemoryConsumer> {
        self.consumers.lock().last().cloned()
    }
}

impl ConsumerFactory for InMemoryConsumerFactory {
    fn configuration_properties(&self) -> HashMap<String, String> {
        self.properties.clone()
    }

    fn create_consumer(
        &self,
        request: ConsumerRequest,
    ) -> Result<Box<dyn ConsumerClient>, ClientError> {
        let consumer = InMemoryConsumer {
            broker: self.broker.clone(),
            rebalance: request.rebalance_listener,
            state: Arc::new(Mutex::new(ConsumerState {
                group_id: request.group_id,
                client_id: request.client_id,
                ..ConsumerState::default()
            })),
        };
        self.consumers.lock().push(consumer.clone());
        Ok(Box::new(consumer))
    }
}

/// Describes topics against an [`InMemoryBroker`]. Topics listed as slow
/// never resolve.
pub struct InMemoryAdminFactory {
    broker: Arc<InMemoryBroker>,
    slow_topics: HashSet<String>,
    unavailable: bool,
}

impl InMemoryAdminFactory {
    pub fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            slow_topics: HashSet::new(),
            unavailable: false,
        }
    }

    pub fn with_slow_topic(mut self, topic: &str) -> Self {
        self.slow_topics.insert(topic.to_string());
        self
    }

    /// Admin client creation fails.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

impl AdminFactory for InMemoryAdminFactory {
    fn create_describer(
        &self,
        _config: &HashMap<String, String>,
    ) -> Result<Box<dyn TopicDescriber>, ClientError> {
        if self.unavailable {
            return Err(ClientError::Kafka(KafkaError::AdminOpCreation(
                "admin client unavailable".to_string(),
            )));
        }
        Ok(Box::new(InMemoryDescriber {
            broker: self.broker.clone(),
            slow_topics: self.slow_topics.clone(),
        }))
    }
}

struct InMemoryDescriber {
    broker: Arc<InMemoryBroker>,
    slow_topics: HashSet<String>,
}

impl TopicDescriber for InMemoryDescriber {
    fn describe_topics(&self, topics: &[String]) -> HashMap<String, DescribeFuture> {
        topics
            .iter()
            .map(|topic| {
                let lookup: DescribeFuture = if self.slow_topics.contains(topic) {
                    futures::future::pending().boxed()
                } else if self.broker.has_topic(topic) {
                    futures::future::ready(Ok(())).boxed()
                } else {
                    futures::future::ready(Err(DescribeError::UnknownTopic(topic.clone()))).boxed()
                };
                (topic.clone(), lookup)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct ScriptedFailure {
    remaining: usize,
    kind: ErrorKind,
}

/// Records every delivery and fails on scripted offsets. Implements both the
/// plain and the acknowledging record listener; as the latter it acknowledges
/// every record it does not fail.
#[derive(Default)]
pub struct RecordingListener {
    deliveries: Mutex<Vec<ConsumerRecord>>,
    failures: Mutex<HashMap<i64, ScriptedFailure>>,
    delay: Option<Duration>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the first `times` deliveries of the record at `offset`.
    pub fn failing(self, offset: i64, times: usize, kind: ErrorKind) -> Self {
        self.failures.lock().insert(
            offset,
            ScriptedFailure {
                remaining: times,
                kind,
            },
        );
        self
    }

    /// Take this long over each record.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn deliveries(&self) -> Vec<ConsumerRecord> {
        self.deliveries.lock().clone()
    }

    pub fn delivered_offsets(&self) -> Vec<i64> {
        self.deliveries.lock().iter().map(|r| r.offset).collect()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().len()
    }

    async fn handle(&self, record: &ConsumerRecord) -> Result<(), ListenerError> {
        self.deliveries.lock().push(record.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut failures = self.failures.lock();
        match failures.get_mut(&record.offset) {
            Some(failure) if failure.remaining > 0 => {
                failure.remaining -= 1;
                Err(ListenerError::new(
                    failure.kind,
                    anyhow::anyhow!("scripted failure at {record}"),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RecordListener for RecordingListener {
    async fn on_record(&self, record: &ConsumerRecord) -> Result<(), ListenerError> {
        self.handle(record).await
    }
}

#[async_trait]
impl AcknowledgingRecordListener for RecordingListener {
    async fn on_record(
        &self,
        record: &ConsumerRecord,
        ack: Acknowledgment,
    ) -> Result<(), ListenerError> {
        self.handle(record).await?;
        ack.acknowledge();
        Ok(())
    }
}

/// Records every batch. Can fail the first `n` batches, optionally pointing
/// at the failed record.
#[derive(Default)]
pub struct RecordingBatchListener {
    batches: Mutex<Vec<Vec<ConsumerRecord>>>,
    failures_left: Mutex<usize>,
    failed_offset: Option<i64>,
}

impl RecordingBatchListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the first `times` batches as a whole.
    pub fn failing(self, times: usize) -> Self {
        *self.failures_left.lock() = times;
        self
    }

    /// Fail the first `times` batches that contain `offset`, at that record.
    pub fn failing_at(mut self, offset: i64, times: usize) -> Self {
        *self.failures_left.lock() = times;
        self.failed_offset = Some(offset);
        self
    }

    pub fn batches(&self) -> Vec<Vec<ConsumerRecord>> {
        self.batches.lock().clone()
    }

    pub fn delivered_offsets(&self) -> Vec<i64> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|r| r.offset)
            .collect()
    }

    fn handle(&self, records: &[ConsumerRecord]) -> Result<(), ListenerError> {
        self.batches.lock().push(records.to_vec());
        let mut failures_left = self.failures_left.lock();
        if *failures_left == 0 {
            return Ok(());
        }
        match self.failed_offset {
            None => {
                *failures_left -= 1;
                Err(ListenerError::retryable(anyhow::anyhow!("scripted batch failure")))
            }
            Some(offset) => match records.iter().position(|r| r.offset == offset) {
                Some(index) => {
                    *failures_left -= 1;
                    Err(
                        ListenerError::retryable(anyhow::anyhow!("scripted failure at {offset}"))
                            .at_index(index),
                    )
                }
                None => Ok(()),
            },
        }
    }
}

#[async_trait]
impl BatchListener for RecordingBatchListener {
    async fn on_batch(&self, records: &[ConsumerRecord]) -> Result<(), ListenerError> {
        self.handle(records)
    }
}

#[async_trait]
impl AcknowledgingBatchListener for RecordingBatchListener {
    async fn on_batch(
        &self,
        records: &[ConsumerRecord],
        ack: Acknowledgment,
    ) -> Result<(), ListenerError> {
        self.handle(records)?;
        ack.acknowledge();
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<ContainerEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ContainerEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&ContainerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    pub fn stopped_events(&self) -> usize {
        self.count(|e| matches!(e, ContainerEvent::ContainerStopped { .. }))
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish(&self, event: ContainerEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Default)]
pub struct RecordingRebalanceListener {
    assigned: Mutex<Vec<Partition>>,
    revoked: Mutex<Vec<Partition>>,
    lost: Mutex<Vec<Partition>>,
}

impl RecordingRebalanceListener {
    pub fn assigned(&self) -> Vec<Partition> {
        self.assigned.lock().clone()
    }

    pub fn revoked(&self) -> Vec<Partition> {
        self.revoked.lock().clone()
    }

    pub fn lost(&self) -> Vec<Partition> {
        self.lost.lock().clone()
    }
}

impl RebalanceListener for RecordingRebalanceListener {
    fn on_partitions_revoked(&self, partitions: &[Partition]) {
        self.revoked.lock().extend_from_slice(partitions);
    }

    fn on_partitions_assigned(&self, partitions: &[Partition]) {
        self.assigned.lock().extend_from_slice(partitions);
    }

    fn on_partitions_lost(&self, partitions: &[Partition]) {
        self.lost.lock().extend_from_slice(partitions);
    }
}

/// Keeps every recovered record; fails every recovery when told to.
#[derive(Default)]
pub struct RecordingRecoverer {
    recovered: Mutex<Vec<(ConsumerRecord, ErrorKind)>>,
    fail: bool,
}

impl RecordingRecoverer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            recovered: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn recovered(&self) -> Vec<(ConsumerRecord, ErrorKind)> {
        self.recovered.lock().clone()
    }
}

#[async_trait]
impl ConsumerRecordRecoverer for RecordingRecoverer {
    async fn recover(
        &self,
        record: &ConsumerRecord,
        error: &ListenerError,
    ) -> Result<(), RecoveryError> {
        if self.fail {
            return Err(RecoveryError::Failed {
                record: record.to_string(),
                reason: "recoverer unavailable".to_string(),
            });
        }
        self.recovered.lock().push((record.clone(), error.kind()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerCall {
    Subscribe(Vec<String>),
    SubscribePattern(String),
    Assign(Vec<TopicPartitionOffset>),
    Seek(Partition, i64),
    StoreOffset(Partition, i64),
    Commit,
    Pause(Vec<Partition>),
    Resume(Vec<Partition>),
    Close,
}

/// Records the side-effecting calls made on it. Polls return the scripted
/// batches in order, then nothing. Clones share their state.
#[derive(Clone, Default)]
pub struct RecordingConsumerClient {
    calls: Arc<Mutex<Vec<ConsumerCall>>>,
    polls: Arc<Mutex<Vec<Vec<ConsumerRecord>>>>,
    assignment: Arc<Mutex<Vec<Partition>>>,
}

impl RecordingConsumerClient {
    pub fn with_polls(self, polls: Vec<Vec<ConsumerRecord>>) -> Self {
        *self.polls.lock() = polls.into_iter().rev().collect();
        self
    }

    pub fn with_assignment(self, assignment: Vec<Partition>) -> Self {
        self.set_assignment(assignment);
        self
    }

    pub fn set_assignment(&self, assignment: Vec<Partition>) {
        *self.assignment.lock() = assignment;
    }

    pub fn calls(&self) -> Vec<ConsumerCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: ConsumerCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ConsumerClient for RecordingConsumerClient {
    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        self.record(ConsumerCall::Subscribe(topics.to_vec()));
        Ok(())
    }

    fn subscribe_pattern(&self, pattern: &Regex) -> Result<(), ClientError> {
        self.record(ConsumerCall::SubscribePattern(pattern.as_str().to_string()));
        Ok(())
    }

    fn assign(&self, partitions: &[TopicPartitionOffset]) -> Result<(), ClientError> {
        self.record(ConsumerCall::Assign(partitions.to_vec()));
        Ok(())
    }

    async fn poll(
        &self,
        _timeout: Duration,
        _max_records: usize,
    ) -> Result<Vec<ConsumerRecord>, ClientError> {
        Ok(self.polls.lock().pop().unwrap_or_default())
    }

    fn seek(&self, partition: &Partition, offset: i64) -> Result<(), ClientError> {
        self.record(ConsumerCall::Seek(partition.clone(), offset));
        Ok(())
    }

    fn store_offset(&self, partition: &Partition, next_offset: i64) -> Result<(), ClientError> {
        self.record(ConsumerCall::StoreOffset(partition.clone(), next_offset));
        Ok(())
    }

    fn commit(&self, _mode: CommitMode) -> Result<(), ClientError> {
        self.record(ConsumerCall::Commit);
        Ok(())
    }

    fn pause(&self, partitions: &[Partition]) -> Result<(), ClientError> {
        self.record(ConsumerCall::Pause(partitions.to_vec()));
        Ok(())
    }

    fn resume(&self, partitions: &[Partition]) -> Result<(), ClientError> {
        self.record(ConsumerCall::Resume(partitions.to_vec()));
        Ok(())
    }

    fn assignment(&self) -> Result<Vec<Partition>, ClientError> {
        Ok(self.assignment.lock().clone())
    }

    fn close(&self) {
        self.record(ConsumerCall::Close);
    }
}
