use std::fmt;

use common_kafka::kafka_producer::KafkaProduceError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

use crate::properties::AckMode;
use crate::types::Partition;

/// Fatal container errors. Configuration and startup failures are returned
/// from `start()`; runtime variants end a consumer task abnormally.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("exactly one of topics, topic pattern or topic partitions must be provided, found {0}")]
    InvalidTopicSelection(usize),
    #[error("invalid topic pattern {pattern}: {source}")]
    InvalidTopicPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("no group.id found in consumer config or container properties; a group.id is required when group management is used")]
    MissingGroupId,
    #[error("a message listener must be registered before the container is started")]
    MissingListener,
    #[error("container {0} is fenced and is not allowed to start")]
    Fenced(String),
    #[error("topic(s) {} not present and missing topics are fatal", .0.join(", "))]
    MissingTopics(Vec<String>),
    #[error("ack mode {ack_mode:?} cannot be used with a {listener} listener")]
    IncompatibleAckMode {
        ack_mode: AckMode,
        listener: &'static str,
    },
    #[error("invalid container configuration: {0}")]
    InvalidConfig(String),
    #[error("consumer error: {0}")]
    Client(#[from] ClientError),
    #[error("record recovery failed: {0}")]
    Recovery(#[from] RecoveryError),
    #[error("transaction failed: {0}")]
    Transaction(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Redelivery may succeed.
    Retryable,
    /// Redelivery will fail the same way; go straight to recovery.
    NonRetryable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::NonRetryable => write!(f, "non-retryable"),
        }
    }
}

/// A failure raised by a message listener.
///
/// Batch listeners can point at the record that failed with
/// [`ListenerError::at_index`]; records before it count as processed.
#[derive(Error, Debug)]
#[error("{kind} listener error: {error}")]
pub struct ListenerError {
    kind: ErrorKind,
    error: anyhow::Error,
    failed_index: Option<usize>,
}

impl ListenerError {
    pub fn new(kind: ErrorKind, error: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            error: error.into(),
            failed_index: None,
        }
    }

    pub fn retryable(error: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::Retryable, error)
    }

    pub fn non_retryable(error: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::NonRetryable, error)
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.failed_index = Some(index);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn failed_index(&self) -> Option<usize> {
        self.failed_index
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.error
    }
}

/// Errors from consumer-side client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("kafka client error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("partition {0} is not assigned to this consumer")]
    NotAssigned(Partition),
    #[error("consumer is closed")]
    Closed,
}

impl ClientError {
    /// Errors after which polling cannot usefully continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Closed => true,
            ClientError::NotAssigned(_) => false,
            ClientError::Kafka(KafkaError::MessageConsumptionFatal(_))
            | ClientError::Kafka(KafkaError::Canceled) => true,
            ClientError::Kafka(KafkaError::Global(code)) => {
                *code == RDKafkaErrorCode::Authentication
            }
            ClientError::Kafka(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("failed to publish {record} to {destination}: {source}")]
    Publish {
        record: String,
        destination: String,
        source: KafkaProduceError,
    },
    #[error("timed out publishing {record} to {destination}")]
    PublishTimeout { record: String, destination: String },
    #[error("failed to recover {record}: {reason}")]
    Failed { record: String, reason: String },
    #[error("failed to reposition consumer after error: {0}")]
    Seek(#[from] ClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_client_errors() {
        assert!(ClientError::Closed.is_fatal());
        assert!(ClientError::Kafka(KafkaError::Canceled).is_fatal());
        assert!(
            ClientError::Kafka(KafkaError::Global(RDKafkaErrorCode::Authentication)).is_fatal()
        );
        assert!(
            !ClientError::Kafka(KafkaError::Global(RDKafkaErrorCode::AllBrokersDown)).is_fatal()
        );
        assert!(!ClientError::NotAssigned(Partition::new("orders", 0)).is_fatal());
    }

    #[test]
    fn listener_error_keeps_kind_and_index() {
        let error = ListenerError::non_retryable(anyhow::anyhow!("bad payload")).at_index(3);
        assert_eq!(error.kind(), ErrorKind::NonRetryable);
        assert_eq!(error.failed_index(), Some(3));
        assert_eq!(error.to_string(), "non-retryable listener error: bad payload");
    }

    #[test]
    fn missing_topics_message_names_topics() {
        let error = ContainerError::MissingTopics(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            error.to_string(),
            "topic(s) a, b not present and missing topics are fatal"
        );
    }
}
