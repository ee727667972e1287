#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use listener_container::error_handler::{DefaultErrorHandler, FixedBackOff};
use listener_container::listener::MessageListener;
use listener_container::poll_loop::ListenerPollLoopFactory;
use listener_container::properties::ContainerPropertiesBuilder;
use listener_container::test_utils::{
    init_test_tracing, wait_until, InMemoryAdminFactory, InMemoryBroker, InMemoryConsumerFactory,
    RecordingEventPublisher, RecordingRecoverer,
};
use listener_container::{ContainerProperties, ListenerContainer};

pub const WAIT: Duration = Duration::from_secs(5);

/// Short poll and shutdown timeouts, no topic selection.
pub fn base_properties() -> ContainerPropertiesBuilder {
    ContainerProperties::builder()
        .poll_timeout(Duration::from_millis(50))
        .shutdown_timeout(Duration::from_secs(2))
}

pub fn properties() -> ContainerPropertiesBuilder {
    base_properties().topics(["orders"]).group_id("orders-group")
}

/// A container over an in-memory broker with one `orders` topic of
/// `partitions` partitions, publishing to a recording publisher.
pub struct Fixture {
    pub broker: Arc<InMemoryBroker>,
    pub consumers: Arc<InMemoryConsumerFactory>,
    pub events: Arc<RecordingEventPublisher>,
    pub container: ListenerContainer,
}

impl Fixture {
    pub fn new(properties: ContainerProperties, partitions: usize) -> Self {
        Self::with_admin(properties, partitions, |broker| {
            InMemoryAdminFactory::new(broker)
        })
    }

    pub fn with_admin(
        properties: ContainerProperties,
        partitions: usize,
        admin: impl FnOnce(Arc<InMemoryBroker>) -> InMemoryAdminFactory,
    ) -> Self {
        init_test_tracing();
        let broker = InMemoryBroker::new();
        broker.create_topic("orders", partitions);
        let consumers = Arc::new(InMemoryConsumerFactory::new(broker.clone()));
        let events = RecordingEventPublisher::new();
        let container = ListenerContainer::new(properties, consumers.clone())
            .with_admin_factory(Arc::new(admin(broker.clone())))
            .with_event_publisher(events.clone());
        Self {
            broker,
            consumers,
            events,
            container,
        }
    }

    /// Recover with `recoverer` after `retries` immediate redeliveries.
    pub fn with_recoverer(self, recoverer: Arc<RecordingRecoverer>, retries: u32) -> Self {
        let handler = DefaultErrorHandler::new(
            recoverer,
            Arc::new(FixedBackOff::new(Duration::ZERO, retries)),
        );
        let factory = ListenerPollLoopFactory::new().with_error_handler(Arc::new(handler));
        Self {
            container: self.container.with_poll_loop_factory(Arc::new(factory)),
            ..self
        }
    }

    pub async fn start(&self, listener: MessageListener) {
        self.container.setup_message_listener(listener);
        self.container.start().await.unwrap();
    }

    pub async fn wait_for_stopped_event(&self) -> bool {
        wait_until(WAIT, || self.events.stopped_events() > 0).await
    }
}
