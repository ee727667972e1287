use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::types::Partition;

/// Callbacks for partition assignment changes.
///
/// Called on the consumer task while the client is rebalancing, so
/// implementations must be fast and must not block on the container.
pub trait RebalanceListener: Send + Sync {
    fn on_partitions_revoked(&self, partitions: &[Partition]);

    fn on_partitions_assigned(&self, partitions: &[Partition]);

    /// Partitions taken away without a clean revoke, e.g. after a session
    /// timeout. Offsets can no longer be committed for them.
    fn on_partitions_lost(&self, partitions: &[Partition]) {
        self.on_partitions_revoked(partitions);
    }
}

/// The listener a container uses when none is configured.
pub struct LoggingRebalanceListener {
    group_id: String,
}

impl LoggingRebalanceListener {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
        }
    }
}

impl RebalanceListener for LoggingRebalanceListener {
    fn on_partitions_revoked(&self, partitions: &[Partition]) {
        info!(group_id = %self.group_id, ?partitions, "{}: partitions revoked", self.group_id);
    }

    fn on_partitions_assigned(&self, partitions: &[Partition]) {
        info!(group_id = %self.group_id, ?partitions, "{}: partitions assigned", self.group_id);
    }

    fn on_partitions_lost(&self, partitions: &[Partition]) {
        info!(group_id = %self.group_id, ?partitions, "{}: partitions lost", self.group_id);
    }
}

/// Wraps the configured listener and counts rebalances, so the poll loop can
/// tell when client-side pause state was reset by a new assignment.
pub struct RebalanceTracker {
    delegate: Arc<dyn RebalanceListener>,
    generation: AtomicU64,
}

impl RebalanceTracker {
    pub fn new(delegate: Arc<dyn RebalanceListener>) -> Self {
        Self {
            delegate,
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl RebalanceListener for RebalanceTracker {
    fn on_partitions_revoked(&self, partitions: &[Partition]) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.delegate.on_partitions_revoked(partitions);
    }

    fn on_partitions_assigned(&self, partitions: &[Partition]) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.delegate.on_partitions_assigned(partitions);
    }

    fn on_partitions_lost(&self, partitions: &[Partition]) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.delegate.on_partitions_lost(partitions);
    }
}
