use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::ClientError;
use crate::rebalance::RebalanceListener;
use crate::types::{ConsumerRecord, Partition, TopicPartitionOffset};

pub mod config;
pub mod kafka;

pub use config::ConsumerConfigBuilder;
pub use kafka::{ContainerConsumerContext, KafkaConsumerClient, KafkaConsumerFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Sync,
    Async,
}

/// The consumer operations a poll loop drives. An instance belongs to exactly
/// one consumer task; offsets are stored explicitly and committed in bulk.
#[async_trait]
pub trait ConsumerClient: Send + Sync {
    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError>;

    fn subscribe_pattern(&self, pattern: &Regex) -> Result<(), ClientError>;

    fn assign(&self, partitions: &[TopicPartitionOffset]) -> Result<(), ClientError>;

    /// Wait up to `timeout` for the first record, then return whatever else is
    /// already buffered, up to `max_records`. Rebalance callbacks run in here.
    async fn poll(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<ConsumerRecord>, ClientError>;

    fn seek(&self, partition: &Partition, offset: i64) -> Result<(), ClientError>;

    /// Mark `next_offset` as the position to commit for the partition.
    fn store_offset(&self, partition: &Partition, next_offset: i64) -> Result<(), ClientError>;

    /// Commit all stored offsets. Committing with nothing stored is not an error.
    fn commit(&self, mode: CommitMode) -> Result<(), ClientError>;

    fn pause(&self, partitions: &[Partition]) -> Result<(), ClientError>;

    fn resume(&self, partitions: &[Partition]) -> Result<(), ClientError>;

    fn assignment(&self) -> Result<Vec<Partition>, ClientError>;

    /// Leave the group (or drop the assignment). Revocation callbacks fire.
    fn close(&self);
}

/// What a container asks of its consumer factory on every start.
pub struct ConsumerRequest {
    pub group_id: Option<String>,
    pub client_id: Option<String>,
    pub overrides: HashMap<String, String>,
    pub rebalance_listener: Arc<dyn RebalanceListener>,
}

pub trait ConsumerFactory: Send + Sync {
    /// Consumer-level configuration, consulted for `group.id` and the admin
    /// settings used by the topic check.
    fn configuration_properties(&self) -> HashMap<String, String>;

    fn create_consumer(
        &self,
        request: ConsumerRequest,
    ) -> Result<Box<dyn ConsumerClient>, ClientError>;
}
