use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use rdkafka::error::KafkaError;

use crate::consumer::KafkaConsumerFactory;
use crate::error::ContainerError;
use crate::error_handler::{DeadLetterPublishingRecoverer, DefaultErrorHandler, FixedBackOff};
use crate::properties::{AckMode, ContainerProperties};
use crate::types::{Partition, TopicPartitionOffset};

#[derive(Envconfig, Clone, Debug)]
pub struct ContainerConfig {
    // Comma separated. Exactly one of topics, pattern and partitions may be set.
    #[envconfig(default = "")]
    pub listener_topics: String,

    pub listener_topic_pattern: Option<String>,

    // topic:partition[@offset], comma separated
    pub listener_topic_partitions: Option<String>,

    pub listener_group_id: Option<String>,

    #[envconfig(default = "batch")]
    pub ack_mode: AckMode, // record, batch, time, count, count_time, manual, manual_immediate

    #[envconfig(default = "1")]
    pub ack_count: usize,

    #[envconfig(default = "5000")]
    pub ack_time_ms: EnvMsDuration,

    #[envconfig(default = "false")]
    pub sub_batch_per_partition: bool,

    #[envconfig(default = "10000")]
    pub shutdown_timeout_ms: EnvMsDuration,

    #[envconfig(default = "false")]
    pub missing_topics_fatal: bool,

    #[envconfig(default = "30")]
    pub topic_check_timeout_secs: u64,

    #[envconfig(default = "5000")]
    pub poll_timeout_ms: EnvMsDuration,

    #[envconfig(default = "500")]
    pub max_poll_records: usize,

    #[envconfig(default = "true")]
    pub intercept_before_tx: bool,

    #[envconfig(default = "true")]
    pub ack_after_handle: bool,

    #[envconfig(default = "-dlt")]
    pub dead_letter_suffix: String,

    #[envconfig(default = "1000")]
    pub backoff_interval_ms: EnvMsDuration,

    #[envconfig(default = "2")]
    pub backoff_max_retries: u32,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    // dead-letter producer
    #[envconfig(nested = true)]
    pub producer: KafkaConfig,
}

impl ContainerConfig {
    pub fn container_properties(&self) -> Result<ContainerProperties, ContainerError> {
        let mut builder = ContainerProperties::builder()
            .ack_mode(self.ack_mode)
            .ack_count(self.ack_count)
            .ack_time(self.ack_time_ms.0)
            .sub_batch_per_partition(self.sub_batch_per_partition)
            .shutdown_timeout(self.shutdown_timeout_ms.0)
            .missing_topics_fatal(self.missing_topics_fatal)
            .topic_check_timeout(Duration::from_secs(self.topic_check_timeout_secs))
            .poll_timeout(self.poll_timeout_ms.0)
            .max_poll_records(self.max_poll_records)
            .intercept_before_tx(self.intercept_before_tx)
            .ack_after_handle(self.ack_after_handle);

        let topics: Vec<&str> = self
            .listener_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if !topics.is_empty() {
            builder = builder.topics(topics);
        }
        if let Some(pattern) = non_blank(&self.listener_topic_pattern) {
            builder = builder.topic_pattern(pattern);
        }
        if let Some(partitions) = non_blank(&self.listener_topic_partitions) {
            builder = builder.topic_partitions(parse_topic_partitions(partitions)?);
        }
        if let Some(group_id) = non_blank(&self.listener_group_id) {
            builder = builder.group_id(group_id);
        }

        builder.build()
    }

    pub fn backoff(&self) -> FixedBackOff {
        FixedBackOff::new(self.backoff_interval_ms.0, self.backoff_max_retries)
    }

    pub fn consumer_factory(&self) -> KafkaConsumerFactory {
        KafkaConsumerFactory::from_config(&self.consumer)
    }

    /// Retries with the configured back-off, then publishes to the dead-letter topic.
    pub async fn dead_letter_error_handler(&self) -> Result<DefaultErrorHandler, KafkaError> {
        let producer = create_kafka_producer(&self.producer).await?;
        let recoverer = DeadLetterPublishingRecoverer::new(producer, &self.producer)
            .with_suffix(&self.dead_letter_suffix);
        Ok(DefaultErrorHandler::new(
            Arc::new(recoverer),
            Arc::new(self.backoff()),
        ))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parse `topic:partition[@offset]` entries separated by commas.
pub fn parse_topic_partitions(value: &str) -> Result<Vec<TopicPartitionOffset>, ContainerError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || {
                ContainerError::InvalidConfig(format!(
                    "invalid topic partition {entry}, expected topic:partition[@offset]"
                ))
            };
            let (topic, rest) = entry.rsplit_once(':').ok_or_else(invalid)?;
            let (partition, offset) = match rest.split_once('@') {
                Some((partition, offset)) => {
                    (partition, Some(offset.parse::<i64>().map_err(|_| invalid())?))
                }
                None => (rest, None),
            };
            let partition = partition.parse::<i32>().map_err(|_| invalid())?;
            if topic.is_empty() {
                return Err(invalid());
            }
            Ok(TopicPartitionOffset::new(
                Partition::new(topic, partition),
                offset,
            ))
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}
