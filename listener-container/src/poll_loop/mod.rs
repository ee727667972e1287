use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::consumer::ConsumerFactory;
use crate::error::ContainerError;
use crate::events::{ContainerEvent, EventPublisher};
use crate::listener::MessageListener;
use crate::pause::PauseRegistry;
use crate::properties::ContainerProperties;
use crate::rebalance::RebalanceListener;

mod commit;
pub mod listener_loop;

pub use listener_loop::{ListenerPollLoop, ListenerPollLoopFactory};

/// The container-owned state a poll loop reads on every iteration.
#[derive(Clone)]
pub struct LoopContext {
    container: String,
    stop: CancellationToken,
    pause_requested: Arc<AtomicBool>,
    pause_registry: Arc<PauseRegistry>,
    publisher: Arc<dyn EventPublisher>,
}

impl LoopContext {
    pub fn new(
        container: String,
        stop: CancellationToken,
        pause_requested: Arc<AtomicBool>,
        pause_registry: Arc<PauseRegistry>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            container,
            stop,
            pause_requested,
            pause_registry,
            publisher,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn pause_registry(&self) -> &PauseRegistry {
        &self.pause_registry
    }

    pub fn publish(&self, event: ContainerEvent) {
        self.publisher.publish(event);
    }
}

/// Everything a poll loop is built from, handed over on each start.
pub struct PollLoopRequest {
    pub container: String,
    pub properties: Arc<ContainerProperties>,
    pub listener: MessageListener,
    pub consumer_factory: Arc<dyn ConsumerFactory>,
    pub group_id: Option<String>,
    pub rebalance_listener: Arc<dyn RebalanceListener>,
}

/// The body of a consumer task. The container drives it with `run_once`
/// until a stop is requested or an iteration fails, then calls `shutdown`
/// exactly once.
#[async_trait]
pub trait PollLoop: Send {
    async fn run_once(&mut self, ctx: &LoopContext) -> Result<(), ContainerError>;

    /// Final commit and consumer close. Runs after normal and abnormal ends alike.
    async fn shutdown(&mut self, ctx: &LoopContext);
}

pub trait PollLoopFactory: Send + Sync {
    fn create(&self, request: PollLoopRequest) -> Result<Box<dyn PollLoop>, ContainerError>;
}
