use std::time::Duration;

use rdkafka::{
    error::KafkaError,
    producer::{FutureProducer, Producer},
};
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

/// A producer bound to a `transactional.id`. begin/commit/abort borrow the
/// producer, so a long-lived dispatcher can open one transaction per delivery.
pub struct TransactionalProducer {
    inner: FutureProducer,
    timeout: Duration,
}

impl TransactionalProducer {
    pub fn from_config(
        config: &KafkaConfig,
        transactional_id: &str,
        timeout: Duration,
    ) -> Result<Self, KafkaError> {
        let mut client_config = config.producer_client_config();
        client_config.set("transactional.id", transactional_id);

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

        api.init_transactions(timeout)?;

        Ok(TransactionalProducer {
            inner: api,
            timeout,
        })
    }

    pub fn begin(&self) -> Result<(), KafkaError> {
        self.inner.begin_transaction()
    }

    pub fn commit(&self) -> Result<(), KafkaError> {
        self.inner.commit_transaction(self.timeout)
    }

    pub fn abort(&self) -> Result<(), KafkaError> {
        self.inner.abort_transaction(self.timeout)
    }
}
