use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::Partition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Normal,
    Abnormal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    ConsumerStarted {
        container: String,
    },
    /// Published once per stop, after the consumer task terminated or the
    /// stop wait timed out.
    ContainerStopped {
        container: String,
        reason: StopReason,
    },
    ConsumerPaused {
        container: String,
        partitions: Vec<Partition>,
    },
    ConsumerResumed {
        container: String,
        partitions: Vec<Partition>,
    },
    PartitionPaused {
        container: String,
        partition: Partition,
    },
    PartitionResumed {
        container: String,
        partition: Partition,
    },
}

impl ContainerEvent {
    pub fn container(&self) -> &str {
        match self {
            ContainerEvent::ConsumerStarted { container }
            | ContainerEvent::ContainerStopped { container, .. }
            | ContainerEvent::ConsumerPaused { container, .. }
            | ContainerEvent::ConsumerResumed { container, .. }
            | ContainerEvent::PartitionPaused { container, .. }
            | ContainerEvent::PartitionResumed { container, .. } => container,
        }
    }
}

/// Fire-and-forget sink for container events. Must not block.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ContainerEvent);
}

pub struct LoggingEventPublisher;

impl EventPublisher for LoggingEventPublisher {
    fn publish(&self, event: ContainerEvent) {
        info!(container = event.container(), ?event, "container event");
    }
}

/// Forwards events to a bounded channel, dropping them when it is full.
pub struct ChannelEventPublisher {
    tx: mpsc::Sender<ContainerEvent>,
}

impl ChannelEventPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ContainerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: ContainerEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "dropping container event");
        }
    }
}
