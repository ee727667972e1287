use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::ConsumerConfig;
use futures::FutureExt;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::config::ConsumerConfigBuilder;
use super::{CommitMode, ConsumerClient, ConsumerFactory, ConsumerRequest};
use crate::error::ClientError;
use crate::rebalance::RebalanceListener;
use crate::types::{ConsumerRecord, Partition, TopicPartitionOffset};

/// Bridges librdkafka rebalance callbacks to a [`RebalanceListener`].
///
/// On a clean revoke, offsets stored so far are committed before the listener
/// runs, so work finished before the rebalance is not redelivered elsewhere.
pub struct ContainerConsumerContext {
    listener: Arc<dyn RebalanceListener>,
    group_id: String,
}

impl ContainerConsumerContext {
    pub fn new(listener: Arc<dyn RebalanceListener>, group_id: String) -> Self {
        Self { listener, group_id }
    }
}

fn to_partitions(list: &TopicPartitionList) -> Vec<Partition> {
    list.elements().into_iter().map(Partition::from).collect()
}

fn is_no_offset(error: &KafkaError) -> bool {
    matches!(
        error,
        KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)
    )
}

impl ClientContext for ContainerConsumerContext {}

impl ConsumerContext for ContainerConsumerContext {
    fn pre_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                let partitions = to_partitions(partitions);
                if partitions.is_empty() {
                    debug!(group_id = %self.group_id, "skipping empty revoke");
                    return;
                }

                if base_consumer.assignment_lost() {
                    self.listener.on_partitions_lost(&partitions);
                    return;
                }

                match base_consumer.commit_consumer_state(rdkafka::consumer::CommitMode::Sync) {
                    Ok(()) => {}
                    Err(e) if is_no_offset(&e) => {}
                    Err(e) => {
                        warn!(group_id = %self.group_id, error = %e, "failed to commit offsets before revoke");
                    }
                }
                self.listener.on_partitions_revoked(&partitions);
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => {
                error!(group_id = %self.group_id, "Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Assign(partitions) = rebalance {
            self.listener
                .on_partitions_assigned(&to_partitions(partitions));
        }
    }
}

pub struct KafkaConsumerClient {
    consumer: StreamConsumer<ContainerConsumerContext>,
    operation_timeout: Duration,
}

impl KafkaConsumerClient {
    pub fn new(consumer: StreamConsumer<ContainerConsumerContext>) -> Self {
        Self {
            consumer,
            operation_timeout: Duration::from_secs(10),
        }
    }

    fn partition_list(partitions: &[Partition]) -> TopicPartitionList {
        let mut list = TopicPartitionList::new();
        for partition in partitions {
            list.add_partition(partition.topic(), partition.partition_number());
        }
        list
    }
}

#[async_trait]
impl ConsumerClient for KafkaConsumerClient {
    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        Ok(())
    }

    fn subscribe_pattern(&self, pattern: &Regex) -> Result<(), ClientError> {
        // librdkafka treats subscriptions starting with '^' as regular expressions
        let source = pattern.as_str();
        let subscription = if source.starts_with('^') {
            source.to_string()
        } else {
            format!("^{source}")
        };
        self.consumer.subscribe(&[subscription.as_str()])?;
        Ok(())
    }

    fn assign(&self, partitions: &[TopicPartitionOffset]) -> Result<(), ClientError> {
        let mut list = TopicPartitionList::new();
        for tpo in partitions {
            let offset = tpo.offset().map(Offset::Offset).unwrap_or(Offset::Stored);
            list.add_partition_offset(tpo.topic(), tpo.partition_number(), offset)?;
        }
        self.consumer.assign(&list)?;
        Ok(())
    }

    async fn poll(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<ConsumerRecord>, ClientError> {
        let mut records = Vec::new();

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(records),
            Ok(message) => records.push(ConsumerRecord::from_message(&message?)),
        }

        while records.len() < max_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => records.push(ConsumerRecord::from_message(&message)),
                Some(Err(e)) => {
                    debug!(error = %e, "error draining buffered records");
                    break;
                }
                None => break,
            }
        }

        Ok(records)
    }

    fn seek(&self, partition: &Partition, offset: i64) -> Result<(), ClientError> {
        self.consumer.seek(
            partition.topic(),
            partition.partition_number(),
            Offset::Offset(offset),
            self.operation_timeout,
        )?;
        Ok(())
    }

    fn store_offset(&self, partition: &Partition, next_offset: i64) -> Result<(), ClientError> {
        self.consumer
            .store_offset(partition.topic(), partition.partition_number(), next_offset)?;
        Ok(())
    }

    fn commit(&self, mode: CommitMode) -> Result<(), ClientError> {
        let mode = match mode {
            CommitMode::Sync => rdkafka::consumer::CommitMode::Sync,
            CommitMode::Async => rdkafka::consumer::CommitMode::Async,
        };
        match self.consumer.commit_consumer_state(mode) {
            Ok(()) => Ok(()),
            Err(e) if is_no_offset(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn pause(&self, partitions: &[Partition]) -> Result<(), ClientError> {
        if partitions.is_empty() {
            return Ok(());
        }
        self.consumer.pause(&Self::partition_list(partitions))?;
        Ok(())
    }

    fn resume(&self, partitions: &[Partition]) -> Result<(), ClientError> {
        if partitions.is_empty() {
            return Ok(());
        }
        self.consumer.resume(&Self::partition_list(partitions))?;
        Ok(())
    }

    fn assignment(&self) -> Result<Vec<Partition>, ClientError> {
        Ok(to_partitions(&self.consumer.assignment()?))
    }

    fn close(&self) {
        let subscribed = self
            .consumer
            .subscription()
            .map(|list| list.count() > 0)
            .unwrap_or(false);
        if subscribed {
            self.consumer.unsubscribe();
        } else if let Err(e) = self.consumer.unassign() {
            warn!(error = %e, "failed to drop partition assignment");
        }
    }
}

/// Builds rdkafka-backed consumers from a fixed set of consumer properties.
pub struct KafkaConsumerFactory {
    properties: HashMap<String, String>,
}

impl KafkaConsumerFactory {
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self { properties }
    }

    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self::new(config.properties().into_iter().collect())
    }
}

impl ConsumerFactory for KafkaConsumerFactory {
    fn configuration_properties(&self) -> HashMap<String, String> {
        self.properties.clone()
    }

    fn create_consumer(
        &self,
        request: ConsumerRequest,
    ) -> Result<Box<dyn ConsumerClient>, ClientError> {
        let mut builder = ConsumerConfigBuilder::from_properties(&self.properties);
        if let Some(group_id) = request.group_id.as_deref() {
            builder = builder.with_group_id(group_id);
        }
        if let Some(client_id) = request.client_id.as_deref() {
            builder = builder.with_client_id(client_id);
        }
        let config = builder.with_overrides(&request.overrides).build();

        let group_id = config.get("group.id").unwrap_or_default().to_string();
        let context = ContainerConsumerContext::new(request.rebalance_listener, group_id.clone());
        let consumer: StreamConsumer<ContainerConsumerContext> =
            config.create_with_context(context)?;

        info!(group_id = %group_id, "created kafka consumer");
        Ok(Box::new(KafkaConsumerClient::new(consumer)))
    }
}
