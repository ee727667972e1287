use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{ConsumerRecord, Partition};

/// Offsets acknowledged by listeners and not yet handed to the consumer.
#[derive(Default)]
pub struct AckQueue {
    pending: Mutex<Vec<(Partition, i64)>>,
}

impl AckQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn drain(&self) -> Vec<(Partition, i64)> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Handle given to acknowledging listeners. Acknowledging marks the records
/// the handle was created for as processed; the container commits them
/// according to its (manual) ack mode.
#[derive(Clone)]
pub struct Acknowledgment {
    offsets: Vec<(Partition, i64)>,
    queue: Arc<AckQueue>,
}

impl Acknowledgment {
    pub fn for_records(records: &[ConsumerRecord], queue: Arc<AckQueue>) -> Self {
        let mut offsets: Vec<(Partition, i64)> = Vec::new();
        for record in records {
            let partition = record.topic_partition();
            let next = record.offset + 1;
            match offsets.iter_mut().find(|(p, _)| *p == partition) {
                Some((_, offset)) => *offset = (*offset).max(next),
                None => offsets.push((partition, next)),
            }
        }
        Self { offsets, queue }
    }

    pub fn acknowledge(&self) {
        self.queue
            .pending
            .lock()
            .extend(self.offsets.iter().cloned());
    }

    pub fn offsets(&self) -> &[(Partition, i64)] {
        &self.offsets
    }
}
