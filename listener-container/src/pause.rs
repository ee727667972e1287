use dashmap::DashSet;

use crate::types::Partition;

/// Partitions the application asked to pause, independent of pausing the
/// whole container. The poll loop reconciles the client against this set at
/// the top of every iteration.
#[derive(Default)]
pub struct PauseRegistry {
    requested: DashSet<Partition>,
}

impl PauseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the partition was already requested.
    pub fn pause(&self, partition: Partition) -> bool {
        self.requested.insert(partition)
    }

    /// Returns false if no pause was requested for the partition.
    pub fn resume(&self, partition: &Partition) -> bool {
        self.requested.remove(partition).is_some()
    }

    pub fn is_pause_requested(&self, partition: &Partition) -> bool {
        self.requested.contains(partition)
    }

    pub fn requested(&self) -> Vec<Partition> {
        let mut partitions: Vec<Partition> =
            self.requested.iter().map(|p| p.key().clone()).collect();
        partitions.sort();
        partitions
    }
}
