use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use listener_container::events::{ContainerEvent, StopReason};
use listener_container::listener::MessageListener;
use listener_container::poll_loop::{LoopContext, PollLoop, PollLoopFactory, PollLoopRequest};
use listener_container::test_utils::{
    wait_until, InMemoryAdminFactory, PollFailure, RecordingListener,
};
use listener_container::{AckMode, ContainerError, Partition, TopicPartitionOffset};

mod common;
use common::{base_properties, properties, Fixture, WAIT};

fn listener() -> (Arc<RecordingListener>, MessageListener) {
    let recording = RecordingListener::new();
    (recording.clone(), MessageListener::Record(recording))
}

fn stopped_reasons(fixture: &Fixture) -> Vec<StopReason> {
    fixture
        .events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ContainerEvent::ContainerStopped { reason, .. } => Some(reason),
            _ => None,
        })
        .collect()
}

fn started_events(fixture: &Fixture) -> usize {
    fixture
        .events
        .count(|e| matches!(e, ContainerEvent::ConsumerStarted { .. }))
}

/// Sleeps through every iteration without looking at the stop signal.
struct SlowLoop {
    iteration: Duration,
}

#[async_trait]
impl PollLoop for SlowLoop {
    async fn run_once(&mut self, _ctx: &LoopContext) -> Result<(), ContainerError> {
        tokio::time::sleep(self.iteration).await;
        Ok(())
    }

    async fn shutdown(&mut self, _ctx: &LoopContext) {}
}

struct SlowLoopFactory(Duration);

impl PollLoopFactory for SlowLoopFactory {
    fn create(&self, _request: PollLoopRequest) -> Result<Box<dyn PollLoop>, ContainerError> {
        Ok(Box::new(SlowLoop { iteration: self.0 }))
    }
}

/// The first loop fails after a long iteration; later ones idle quickly.
#[derive(Default)]
struct LateFailureLoopFactory {
    created: AtomicUsize,
}

struct LateFailureLoop;

#[async_trait]
impl PollLoop for LateFailureLoop {
    async fn run_once(&mut self, _ctx: &LoopContext) -> Result<(), ContainerError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Err(ContainerError::InvalidConfig("broker went away".to_string()))
    }

    async fn shutdown(&mut self, _ctx: &LoopContext) {}
}

impl PollLoopFactory for LateFailureLoopFactory {
    fn create(&self, _request: PollLoopRequest) -> Result<Box<dyn PollLoop>, ContainerError> {
        if self.created.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Box::new(LateFailureLoop))
        } else {
            Ok(Box::new(SlowLoop {
                iteration: Duration::from_millis(10),
            }))
        }
    }
}

fn with_loops(fixture: Fixture, factory: Arc<dyn PollLoopFactory>) -> Fixture {
    Fixture {
        container: fixture.container.with_poll_loop_factory(factory),
        ..fixture
    }
}

struct PanickingLoop;

#[async_trait]
impl PollLoop for PanickingLoop {
    async fn run_once(&mut self, _ctx: &LoopContext) -> Result<(), ContainerError> {
        panic!("listener blew up");
    }

    async fn shutdown(&mut self, _ctx: &LoopContext) {}
}

struct PanickingLoopFactory;

impl PollLoopFactory for PanickingLoopFactory {
    fn create(&self, _request: PollLoopRequest) -> Result<Box<dyn PollLoop>, ContainerError> {
        Ok(Box::new(PanickingLoop))
    }
}

#[tokio::test]
async fn starting_twice_runs_one_consumer() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (_, listener) = listener();

    fixture.start(listener).await;
    fixture.container.start().await.unwrap();

    assert!(fixture.container.is_running());
    assert!(wait_until(WAIT, || started_events(&fixture) == 1).await);
    assert_eq!(fixture.consumers.consumers().len(), 1);

    let consumer = fixture.consumers.last_consumer().unwrap();
    assert_eq!(consumer.group_id().as_deref(), Some("orders-group"));
    assert_eq!(consumer.client_id(), Some(fixture.container.name()));

    fixture.container.stop().await;
    assert_eq!(started_events(&fixture), 1);
}

#[tokio::test]
async fn stop_publishes_one_event_and_closes_consumer() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.start(listener).await;
    assert!(wait_until(WAIT, || started_events(&fixture) == 1).await);

    fixture.container.stop().await;

    assert!(!fixture.container.is_running());
    assert!(fixture.container.stopped_normally());
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Normal]);
    assert!(fixture.consumers.last_consumer().unwrap().is_closed());

    // a second stop has nothing to do
    fixture.container.stop().await;
    assert_eq!(fixture.events.stopped_events(), 1);
}

#[tokio::test]
async fn stopping_a_container_that_never_ran_is_silent() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let called = Arc::new(Mutex::new(false));

    fixture.container.stop().await;
    let flag = called.clone();
    fixture
        .container
        .stop_with_callback(move || *flag.lock() = true)
        .await;

    assert!(*called.lock());
    assert!(fixture.events.events().is_empty());
}

#[tokio::test]
async fn stop_timeout_still_publishes_exactly_once() {
    let fixture = Fixture::new(
        properties()
            .shutdown_timeout(Duration::from_millis(50))
            .build()
            .unwrap(),
        1,
    );
    let fixture = Fixture {
        container: fixture
            .container
            .with_poll_loop_factory(Arc::new(SlowLoopFactory(Duration::from_millis(400)))),
        ..fixture
    };
    let (_, listener) = listener();
    fixture.start(listener).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    fixture.container.stop().await;
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(fixture.events.stopped_events(), 1);

    // the task terminating late must not publish again
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fixture.events.stopped_events(), 1);
}

#[tokio::test]
async fn stop_without_wait_publishes_after_termination() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.start(listener).await;

    fixture.container.stop_with_wait(false).await;
    assert!(!fixture.container.is_running());

    assert!(fixture.wait_for_stopped_event().await);
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Normal]);
    assert!(fixture.consumers.last_consumer().unwrap().is_closed());
}

#[tokio::test]
async fn stop_without_wait_returns_before_a_slow_task_terminates() {
    let fixture = with_loops(
        Fixture::new(
            properties()
                .shutdown_timeout(Duration::from_millis(50))
                .build()
                .unwrap(),
            1,
        ),
        Arc::new(SlowLoopFactory(Duration::from_millis(400))),
    );
    let (_, listener) = listener();
    fixture.start(listener).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    fixture.container.stop_with_wait(false).await;
    assert!(started.elapsed() < Duration::from_millis(50));
    assert!(!fixture.container.is_running());
    assert_eq!(fixture.events.stopped_events(), 0);

    assert!(fixture.wait_for_stopped_event().await);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Normal]);
}

#[tokio::test]
async fn cancelled_stop_still_publishes_stopped_event() {
    let fixture = with_loops(
        Fixture::new(properties().build().unwrap(), 1),
        Arc::new(SlowLoopFactory(Duration::from_millis(300))),
    );
    let (_, listener) = listener();
    fixture.start(listener).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let waited = tokio::time::timeout(Duration::from_millis(20), fixture.container.stop()).await;
    assert!(waited.is_err());
    assert!(!fixture.container.is_running());

    assert!(fixture.wait_for_stopped_event().await);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Normal]);
}

#[tokio::test]
async fn late_failure_of_a_stopped_task_leaves_the_restart_running() {
    let fixture = with_loops(
        Fixture::new(
            properties()
                .shutdown_timeout(Duration::from_millis(50))
                .build()
                .unwrap(),
            1,
        ),
        Arc::new(LateFailureLoopFactory::default()),
    );
    let (_, listener) = listener();
    fixture.start(listener).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // times out; the first task is still inside its iteration
    fixture.container.stop().await;
    assert_eq!(fixture.events.stopped_events(), 1);
    fixture.container.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(fixture.container.is_running());
    assert!(fixture.container.stopped_normally());
    assert_eq!(fixture.events.stopped_events(), 1);

    fixture.container.stop().await;
    assert_eq!(
        stopped_reasons(&fixture),
        vec![StopReason::Normal, StopReason::Normal]
    );
}

#[tokio::test]
async fn stop_callback_runs_before_stopped_event() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.start(listener).await;

    let seen = Arc::new(Mutex::new(None));
    let events = fixture.events.clone();
    let slot = seen.clone();
    fixture
        .container
        .stop_with_callback(move || *slot.lock() = Some(events.stopped_events()))
        .await;

    assert!(fixture.wait_for_stopped_event().await);
    assert_eq!(*seen.lock(), Some(0));
    assert_eq!(fixture.events.stopped_events(), 1);
}

#[tokio::test]
async fn stop_abnormally_when_idle_publishes_abnormal_stop() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let called = Arc::new(Mutex::new(false));
    let flag = called.clone();

    fixture
        .container
        .stop_abnormally(move || *flag.lock() = true)
        .await;

    assert!(*called.lock());
    assert!(!fixture.container.stopped_normally());
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Abnormal]);
}

#[tokio::test]
async fn stop_abnormally_while_running() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.start(listener).await;

    fixture.container.stop_abnormally(|| {}).await;

    assert!(fixture.wait_for_stopped_event().await);
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Abnormal]);
    assert!(!fixture.container.is_running());
}

#[tokio::test]
async fn group_id_is_required_for_subscriptions() {
    let fixture = Fixture::new(base_properties().topics(["orders"]).build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.container.setup_message_listener(listener);

    let result = fixture.container.start().await;
    assert!(matches!(result, Err(ContainerError::MissingGroupId)));
    assert!(!fixture.container.is_running());
}

#[tokio::test]
async fn explicit_partitions_start_without_group() {
    let fixture = Fixture::new(
        base_properties()
            .topic_partitions(vec![TopicPartitionOffset::new(
                Partition::new("orders", 0),
                None,
            )])
            .build()
            .unwrap(),
        1,
    );
    let (recording, listener) = listener();
    fixture.broker.produce("orders", 0, "a");
    fixture.start(listener).await;

    assert!(wait_until(WAIT, || recording.delivery_count() == 1).await);
    assert_eq!(fixture.consumers.last_consumer().unwrap().group_id(), None);
    fixture.container.stop().await;
}

#[tokio::test]
async fn start_requires_a_listener() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    assert!(matches!(
        fixture.container.start().await,
        Err(ContainerError::MissingListener)
    ));
}

#[tokio::test]
async fn fenced_container_refuses_to_start() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.container.setup_message_listener(listener);
    fixture.container.set_name("orders-container");
    fixture.container.fence();

    let result = fixture.container.start().await;
    assert!(matches!(result, Err(ContainerError::Fenced(name)) if name == "orders-container"));
    assert!(fixture.consumers.consumers().is_empty());
}

#[tokio::test]
async fn manual_ack_mode_needs_acknowledging_listener() {
    let fixture = Fixture::new(properties().ack_mode(AckMode::Manual).build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.container.setup_message_listener(listener);

    assert!(matches!(
        fixture.container.start().await,
        Err(ContainerError::IncompatibleAckMode {
            ack_mode: AckMode::Manual,
            ..
        })
    ));
}

#[tokio::test]
async fn missing_topics_fail_start_when_fatal() {
    let fixture = Fixture::new(
        properties()
            .topics(["orders", "payments"])
            .missing_topics_fatal(true)
            .build()
            .unwrap(),
        1,
    );
    let (_, listener) = listener();
    fixture.container.setup_message_listener(listener);

    let result = fixture.container.start().await;
    assert!(
        matches!(result, Err(ContainerError::MissingTopics(ref missing)) if missing == &vec!["payments".to_string()])
    );
    assert!(!fixture.container.is_running());
    assert!(fixture.consumers.consumers().is_empty());
}

#[tokio::test]
async fn slow_topic_lookup_counts_as_missing() {
    let fixture = Fixture::with_admin(
        properties()
            .missing_topics_fatal(true)
            .topic_check_timeout(Duration::from_millis(50))
            .build()
            .unwrap(),
        1,
        |broker| {
            InMemoryAdminFactory::new(broker)
                .with_slow_topic("orders")
        },
    );
    let (_, listener) = listener();
    fixture.container.setup_message_listener(listener);

    let result = fixture.container.start().await;
    assert!(
        matches!(result, Err(ContainerError::MissingTopics(ref missing)) if missing == &vec!["orders".to_string()])
    );
}

#[tokio::test]
async fn unavailable_admin_skips_topic_check() {
    let fixture = Fixture::with_admin(
        properties()
            .topics(["payments"])
            .missing_topics_fatal(true)
            .build()
            .unwrap(),
        1,
        |broker| InMemoryAdminFactory::new(broker).unavailable(),
    );
    let (_, listener) = listener();
    fixture.start(listener).await;

    assert!(fixture.container.is_running());
    fixture.container.stop().await;
}

#[tokio::test]
async fn fatal_poll_error_stops_container_abnormally() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (_, listener) = listener();
    fixture.start(listener).await;
    assert!(wait_until(WAIT, || started_events(&fixture) == 1).await);

    fixture.broker.set_poll_failure(Some(PollFailure::Fatal));

    assert!(fixture.wait_for_stopped_event().await);
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Abnormal]);
    assert!(!fixture.container.is_running());
    assert!(!fixture.container.stopped_normally());
    assert!(fixture.consumers.last_consumer().unwrap().is_closed());
}

#[tokio::test]
async fn transient_poll_errors_keep_consuming() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (recording, listener) = listener();
    fixture.start(listener).await;
    assert!(wait_until(WAIT, || started_events(&fixture) == 1).await);

    fixture.broker.set_poll_failure(Some(PollFailure::Transient));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fixture.container.is_running());
    assert_eq!(fixture.events.stopped_events(), 0);

    fixture.broker.set_poll_failure(None);
    fixture.broker.produce("orders", 0, "after the outage");
    assert!(wait_until(WAIT, || recording.delivery_count() == 1).await);

    fixture.container.stop().await;
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Normal]);
}

#[tokio::test]
async fn panicking_consumer_task_stops_abnormally() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let fixture = Fixture {
        container: fixture
            .container
            .with_poll_loop_factory(Arc::new(PanickingLoopFactory)),
        ..fixture
    };
    let (_, listener) = listener();
    fixture.start(listener).await;

    assert!(fixture.wait_for_stopped_event().await);
    assert_eq!(stopped_reasons(&fixture), vec![StopReason::Abnormal]);
    assert!(!fixture.container.is_running());
}

#[tokio::test]
async fn pause_and_resume_whole_container() {
    let fixture = Fixture::new(properties().build().unwrap(), 2);
    let (recording, listener) = listener();
    fixture.start(listener).await;
    let consumer = fixture.consumers.last_consumer().unwrap();
    assert!(wait_until(WAIT, || consumer.polls() > 0).await);

    fixture.container.pause();
    assert!(
        wait_until(WAIT, || fixture
            .events
            .count(|e| matches!(e, ContainerEvent::ConsumerPaused { .. }))
            == 1)
        .await
    );
    assert_eq!(
        consumer.paused(),
        vec![Partition::new("orders", 0), Partition::new("orders", 1)]
    );

    fixture.broker.produce("orders", 1, "held back");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recording.delivery_count(), 0);

    fixture.container.resume();
    assert!(wait_until(WAIT, || recording.delivery_count() == 1).await);
    assert_eq!(
        fixture
            .events
            .count(|e| matches!(e, ContainerEvent::ConsumerResumed { .. })),
        1
    );
    assert!(consumer.paused().is_empty());

    fixture.container.stop().await;
}

#[tokio::test]
async fn partition_pause_round_trip() {
    let fixture = Fixture::new(properties().build().unwrap(), 2);
    let (recording, listener) = listener();
    let p1 = Partition::new("orders", 1);
    fixture.start(listener).await;

    fixture.container.pause_partition(p1.clone());
    assert!(
        wait_until(WAIT, || fixture.events.count(
            |e| matches!(e, ContainerEvent::PartitionPaused { partition, .. } if *partition == p1)
        ) == 1)
        .await
    );

    fixture.broker.produce("orders", 0, "flows");
    fixture.broker.produce("orders", 1, "waits");
    assert!(wait_until(WAIT, || recording.delivery_count() == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recording.deliveries()[0].partition, 0);
    assert_eq!(recording.delivery_count(), 1);

    fixture.container.resume_partition(&p1);
    assert!(wait_until(WAIT, || recording.delivery_count() == 2).await);
    assert_eq!(
        fixture
            .events
            .count(|e| matches!(e, ContainerEvent::PartitionResumed { .. })),
        1
    );

    fixture.container.stop().await;
}

#[tokio::test]
async fn partition_pause_survives_rebalance() {
    let fixture = Fixture::new(properties().build().unwrap(), 2);
    let (_, listener) = listener();
    let p0 = Partition::new("orders", 0);
    fixture.start(listener).await;
    let consumer = fixture.consumers.last_consumer().unwrap();

    fixture.container.pause_partition(p0.clone());
    assert!(wait_until(WAIT, || consumer.paused() == vec![p0.clone()]).await);

    let polls = consumer.polls();
    consumer.rebalance();
    assert!(consumer.paused().is_empty());
    assert!(
        wait_until(WAIT, || {
            consumer.polls() > polls + 1 && consumer.paused() == vec![p0.clone()]
        })
        .await
    );

    // the pause was re-applied, not requested again
    assert_eq!(
        fixture
            .events
            .count(|e| matches!(e, ContainerEvent::PartitionPaused { .. })),
        1
    );
    fixture.container.stop().await;
}

#[tokio::test]
async fn restart_creates_a_fresh_consumer() {
    let fixture = Fixture::new(properties().build().unwrap(), 1);
    let (recording, listener) = listener();
    fixture.broker.produce("orders", 0, "first");
    fixture.start(listener).await;
    assert!(wait_until(WAIT, || recording.delivery_count() == 1).await);
    fixture.container.stop().await;

    fixture.broker.produce("orders", 0, "second");
    fixture.container.start().await.unwrap();
    assert!(wait_until(WAIT, || recording.delivery_count() == 2).await);
    fixture.container.stop().await;

    assert_eq!(fixture.consumers.consumers().len(), 2);
    assert_eq!(recording.delivered_offsets(), vec![0, 1]);
    assert_eq!(started_events(&fixture), 2);
    assert_eq!(
        stopped_reasons(&fixture),
        vec![StopReason::Normal, StopReason::Normal]
    );
}
