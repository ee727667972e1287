use std::sync::Arc;

use async_trait::async_trait;

use crate::acknowledgment::Acknowledgment;
use crate::error::{ContainerError, ListenerError};
use crate::properties::AckMode;
use crate::types::ConsumerRecord;

#[async_trait]
pub trait RecordListener: Send + Sync {
    async fn on_record(&self, record: &ConsumerRecord) -> Result<(), ListenerError>;
}

#[async_trait]
pub trait AcknowledgingRecordListener: Send + Sync {
    async fn on_record(
        &self,
        record: &ConsumerRecord,
        ack: Acknowledgment,
    ) -> Result<(), ListenerError>;
}

#[async_trait]
pub trait BatchListener: Send + Sync {
    async fn on_batch(&self, records: &[ConsumerRecord]) -> Result<(), ListenerError>;
}

#[async_trait]
pub trait AcknowledgingBatchListener: Send + Sync {
    async fn on_batch(
        &self,
        records: &[ConsumerRecord],
        ack: Acknowledgment,
    ) -> Result<(), ListenerError>;
}

/// The listener a container dispatches to.
#[derive(Clone)]
pub enum MessageListener {
    Record(Arc<dyn RecordListener>),
    AcknowledgingRecord(Arc<dyn AcknowledgingRecordListener>),
    Batch(Arc<dyn BatchListener>),
    AcknowledgingBatch(Arc<dyn AcknowledgingBatchListener>),
}

impl MessageListener {
    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            MessageListener::Batch(_) | MessageListener::AcknowledgingBatch(_)
        )
    }

    pub fn is_acknowledging(&self) -> bool {
        matches!(
            self,
            MessageListener::AcknowledgingRecord(_) | MessageListener::AcknowledgingBatch(_)
        )
    }

    pub fn shape(&self) -> &'static str {
        match self {
            MessageListener::Record(_) => "record",
            MessageListener::AcknowledgingRecord(_) => "acknowledging record",
            MessageListener::Batch(_) => "batch",
            MessageListener::AcknowledgingBatch(_) => "acknowledging batch",
        }
    }

    /// Manual ack modes need a listener that receives an [`Acknowledgment`],
    /// and such a listener is only honored in a manual ack mode. A record ack
    /// mode has no meaning for batch listeners.
    pub fn validate(&self, ack_mode: AckMode) -> Result<(), ContainerError> {
        let compatible = if ack_mode.is_manual() {
            self.is_acknowledging()
        } else {
            !self.is_acknowledging() && !(self.is_batch() && ack_mode == AckMode::Record)
        };
        if compatible {
            Ok(())
        } else {
            Err(ContainerError::IncompatibleAckMode {
                ack_mode,
                listener: self.shape(),
            })
        }
    }
}
