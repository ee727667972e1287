use std::time::Duration;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{determine_send_timeout, send_record_to_kafka, OutgoingRecord};
#[cfg(test)]
use mockall::automock;
use rdkafka::producer::FutureProducer;
use tracing::{error, info};

use crate::error::{ListenerError, RecoveryError};
use crate::retry_topic::{dlt_topic, DEFAULT_DLT_SUFFIX};
use crate::types::ConsumerRecord;

pub const DLT_ORIGINAL_TOPIC: &str = "kafka_dlt-original-topic";
pub const DLT_ORIGINAL_PARTITION: &str = "kafka_dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET: &str = "kafka_dlt-original-offset";
pub const DLT_ORIGINAL_TIMESTAMP: &str = "kafka_dlt-original-timestamp";
pub const DLT_EXCEPTION_MESSAGE: &str = "kafka_dlt-exception-message";
pub const DLT_EXCEPTION_KIND: &str = "kafka_dlt-exception-kind";

const DEFAULT_SEND_TIMEOUT_BUFFER: Duration = Duration::from_secs(5);
const DEFAULT_MIN_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Final handling for a record whose retries are exhausted.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConsumerRecordRecoverer: Send + Sync {
    async fn recover(
        &self,
        record: &ConsumerRecord,
        error: &ListenerError,
    ) -> Result<(), RecoveryError>;
}

/// Logs the record and drops it.
pub struct LoggingRecoverer;

#[async_trait]
impl ConsumerRecordRecoverer for LoggingRecoverer {
    async fn recover(
        &self,
        record: &ConsumerRecord,
        error: &ListenerError,
    ) -> Result<(), RecoveryError> {
        error!(record = %record, error = %error, "Backoff exhausted for {}", record);
        Ok(())
    }
}

/// Publishes failed records to `<topic><suffix>`, by default on the same
/// partition, with headers describing where the record came from and why it
/// failed.
pub struct DeadLetterPublishingRecoverer {
    producer: FutureProducer,
    suffix: String,
    same_partition: bool,
    send_timeout: Duration,
}

impl DeadLetterPublishingRecoverer {
    pub fn new(producer: FutureProducer, config: &KafkaConfig) -> Self {
        let message_timeout = config.kafka_message_timeout_ms.to_string();
        let send_timeout = determine_send_timeout(
            [("message.timeout.ms", message_timeout.as_str())],
            DEFAULT_SEND_TIMEOUT_BUFFER,
            DEFAULT_MIN_SEND_TIMEOUT,
        );
        Self {
            producer,
            suffix: DEFAULT_DLT_SUFFIX.to_string(),
            same_partition: true,
            send_timeout,
        }
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_string();
        self
    }

    /// Let the producer pick the dead-letter partition instead.
    pub fn with_same_partition(mut self, same_partition: bool) -> Self {
        self.same_partition = same_partition;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn destination(&self, record: &ConsumerRecord) -> String {
        dlt_topic(&record.topic, &self.suffix)
    }

    pub fn dead_letter_record(
        &self,
        record: &ConsumerRecord,
        error: &ListenerError,
    ) -> OutgoingRecord {
        OutgoingRecord {
            topic: self.destination(record),
            partition: self.same_partition.then_some(record.partition),
            key: record.key.as_ref().map(|k| k.to_vec()),
            payload: record.payload.as_ref().map(|p| p.to_vec()),
            timestamp: record.timestamp,
            headers: dead_letter_headers(record, error),
        }
    }
}

/// The original headers, minus any dead-letter headers from an earlier pass,
/// followed by fresh ones for this failure.
pub fn dead_letter_headers(
    record: &ConsumerRecord,
    error: &ListenerError,
) -> Vec<(String, Vec<u8>)> {
    let mut headers: Vec<(String, Vec<u8>)> = record
        .headers
        .iter()
        .filter(|(key, _)| !key.starts_with("kafka_dlt-"))
        .map(|(key, value)| (key.clone(), value.to_vec()))
        .collect();

    headers.push((DLT_ORIGINAL_TOPIC.to_string(), record.topic.clone().into_bytes()));
    headers.push((
        DLT_ORIGINAL_PARTITION.to_string(),
        record.partition.to_string().into_bytes(),
    ));
    headers.push((
        DLT_ORIGINAL_OFFSET.to_string(),
        record.offset.to_string().into_bytes(),
    ));
    if let Some(timestamp) = record.timestamp {
        headers.push((
            DLT_ORIGINAL_TIMESTAMP.to_string(),
            timestamp.to_string().into_bytes(),
        ));
    }
    headers.push((
        DLT_EXCEPTION_MESSAGE.to_string(),
        format!("{:#}", error.cause()).into_bytes(),
    ));
    headers.push((
        DLT_EXCEPTION_KIND.to_string(),
        error.kind().to_string().into_bytes(),
    ));
    headers
}

#[async_trait]
impl ConsumerRecordRecoverer for DeadLetterPublishingRecoverer {
    async fn recover(
        &self,
        record: &ConsumerRecord,
        error: &ListenerError,
    ) -> Result<(), RecoveryError> {
        let outgoing = self.dead_letter_record(record, error);
        let destination = outgoing.topic.clone();

        match tokio::time::timeout(
            self.send_timeout,
            send_record_to_kafka(&self.producer, &outgoing),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(
                    record = %record,
                    destination = %destination,
                    "published record to dead-letter topic"
                );
                Ok(())
            }
            Ok(Err(source)) => Err(RecoveryError::Publish {
                record: record.to_string(),
                destination,
                source,
            }),
            Err(_) => Err(RecoveryError::PublishTimeout {
                record: record.to_string(),
                destination,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use common_kafka::test::create_mock_kafka;
    use rdkafka::consumer::{BaseConsumer, Consumer};
    use rdkafka::message::Headers;
    use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};

    use super::*;

    fn failing_record() -> ConsumerRecord {
        ConsumerRecord::new("orders", 0, 17)
            .with_key("order-1")
            .with_payload("{\"total\": 12}")
            .with_header("trace-id", "abc")
            .with_header(DLT_EXCEPTION_MESSAGE, "stale")
    }

    fn header<'a>(headers: &'a [(String, Vec<u8>)], key: &str) -> Option<&'a [u8]> {
        headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    #[test]
    fn headers_describe_origin_and_failure() {
        let error = ListenerError::non_retryable(anyhow::anyhow!("invalid total"));
        let headers = dead_letter_headers(&failing_record(), &error);

        assert_eq!(header(&headers, "trace-id"), Some(&b"abc"[..]));
        assert_eq!(header(&headers, DLT_ORIGINAL_TOPIC), Some(&b"orders"[..]));
        assert_eq!(header(&headers, DLT_ORIGINAL_PARTITION), Some(&b"0"[..]));
        assert_eq!(header(&headers, DLT_ORIGINAL_OFFSET), Some(&b"17"[..]));
        assert_eq!(header(&headers, DLT_EXCEPTION_MESSAGE), Some(&b"invalid total"[..]));
        assert_eq!(header(&headers, DLT_EXCEPTION_KIND), Some(&b"non-retryable"[..]));
        assert!(header(&headers, DLT_ORIGINAL_TIMESTAMP).is_none());
        assert_eq!(
            headers
                .iter()
                .filter(|(k, _)| k == DLT_EXCEPTION_MESSAGE)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn publishes_to_dead_letter_topic_on_same_partition() {
        let (cluster, producer) = create_mock_kafka().await;
        cluster
            .create_topic("orders-dlt", 1, 1)
            .expect("failed to create topic");

        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_producer_queue_messages: 1000,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_tls: false,
            kafka_hosts: cluster.bootstrap_servers(),
        };
        let recoverer = DeadLetterPublishingRecoverer::new(producer, &config);
        let error = ListenerError::non_retryable(anyhow::anyhow!("invalid total"));

        recoverer
            .recover(&failing_record(), &error)
            .await
            .expect("recovery failed");

        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", cluster.bootstrap_servers())
            .set("group.id", "dlt-check")
            .set("enable.auto.commit", "false")
            .create()
            .expect("failed to create consumer");
        let mut list = TopicPartitionList::new();
        list.add_partition_offset("orders-dlt", 0, Offset::Beginning)
            .unwrap();
        consumer.assign(&list).unwrap();

        let message = (0..10)
            .find_map(|_| consumer.poll(Duration::from_secs(1)))
            .expect("no dead-letter record")
            .expect("consume failed");

        assert_eq!(message.partition(), 0);
        assert_eq!(message.key(), Some(&b"order-1"[..]));
        assert_eq!(message.payload(), Some(&b"{\"total\": 12}"[..]));
        let headers = message.headers().expect("headers missing");
        let offset = headers
            .iter()
            .find(|h| h.key == DLT_ORIGINAL_OFFSET)
            .and_then(|h| h.value);
        assert_eq!(offset, Some(&b"17"[..]));
    }

    #[tokio::test]
    async fn mock_recoverer_sees_the_failed_record() {
        let mut recoverer = MockConsumerRecordRecoverer::new();
        recoverer
            .expect_recover()
            .withf(|record, error| {
                record.offset == 17 && error.kind() == crate::ErrorKind::Retryable
            })
            .times(1)
            .returning(|_, _| Ok(()));

        recoverer
            .recover(
                &failing_record(),
                &ListenerError::retryable(anyhow::anyhow!("timeout")),
            )
            .await
            .unwrap();
    }
}
