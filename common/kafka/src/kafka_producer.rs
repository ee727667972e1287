use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientContext;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::DEFAULT_DELIVERY_TIMEOUT_MS;

pub async fn create_kafka_producer(config: &KafkaConfig) -> Result<FutureProducer, KafkaError> {
    let client_config = config.producer_client_config();

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer = client_config.create()?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// A raw record headed for Kafka. Key and payload are passed through untouched,
/// which is what redelivery of an already-serialized record needs.
#[derive(Debug, Clone, Default)]
pub struct OutgoingRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl OutgoingRecord {
    fn owned_headers(&self) -> Option<OwnedHeaders> {
        if self.headers.is_empty() {
            return None;
        }
        let headers = self
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_slice()),
                })
            });
        Some(headers)
    }
}

/// Produce one record and wait for the broker acknowledgement.
pub async fn send_record_to_kafka<C: ClientContext + 'static>(
    kafka_producer: &FutureProducer<C>,
    record: &OutgoingRecord,
) -> Result<(), KafkaProduceError> {
    let headers = record.owned_headers();
    let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic);
    if let Some(key) = record.key.as_deref() {
        future_record = future_record.key(key);
    }
    if let Some(payload) = record.payload.as_deref() {
        future_record = future_record.payload(payload);
    }
    if let Some(partition) = record.partition {
        future_record = future_record.partition(partition);
    }
    if let Some(timestamp) = record.timestamp {
        future_record = future_record.timestamp(timestamp);
    }
    if let Some(headers) = headers {
        future_record = future_record.headers(headers);
    }

    let future_handle = match kafka_producer.send_result(future_record) {
        Ok(f) => f,
        Err((e, _)) => return Err(KafkaProduceError::KafkaProduceError { error: e }),
    };

    match future_handle.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err((e, _))) => Err(KafkaProduceError::KafkaProduceError { error: e }),
        Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
    }
}

/// How long a caller should wait on a send before giving up: the producer's
/// delivery timeout plus `buffer`, never less than `min`.
pub fn determine_send_timeout<'a>(
    producer_props: impl IntoIterator<Item = (&'a str, &'a str)>,
    buffer: Duration,
    min: Duration,
) -> Duration {
    let configured = producer_props
        .into_iter()
        .find(|(key, _)| *key == "delivery.timeout.ms" || *key == "message.timeout.ms")
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_DELIVERY_TIMEOUT_MS);

    std::cmp::max(Duration::from_millis(configured) + buffer, min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_timeout_uses_configured_delivery_timeout() {
        let timeout = determine_send_timeout(
            [("delivery.timeout.ms", "5000")],
            Duration::from_millis(500),
            Duration::from_secs(1),
        );
        assert_eq!(timeout, Duration::from_millis(5500));
    }

    #[test]
    fn send_timeout_respects_minimum() {
        let timeout = determine_send_timeout(
            [("message.timeout.ms", "100")],
            Duration::from_millis(100),
            Duration::from_secs(2),
        );
        assert_eq!(timeout, Duration::from_secs(2));
    }

    #[test]
    fn send_timeout_falls_back_to_default_on_garbage() {
        let timeout = determine_send_timeout(
            [("delivery.timeout.ms", "soon")],
            Duration::ZERO,
            Duration::ZERO,
        );
        assert_eq!(timeout, Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS));

        let timeout = determine_send_timeout(
            Vec::<(&str, &str)>::new(),
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(
            timeout,
            Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS) + Duration::from_secs(1)
        );
    }
}
