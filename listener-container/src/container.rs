use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::consumer::ConsumerFactory;
use crate::error::ContainerError;
use crate::events::{ContainerEvent, EventPublisher, LoggingEventPublisher, StopReason};
use crate::identity::ContainerIdentity;
use crate::listener::MessageListener;
use crate::pause::PauseRegistry;
use crate::poll_loop::{
    ListenerPollLoopFactory, LoopContext, PollLoop, PollLoopFactory, PollLoopRequest,
};
use crate::properties::ContainerProperties;
use crate::rebalance::{LoggingRebalanceListener, RebalanceListener};
use crate::shutdown::{RunCycle, StopCallback, Termination};
use crate::topic_check::{check_topics, AdminFactory, KafkaAdminFactory};
use crate::types::Partition;

/// Containers start late and stop early relative to other lifecycle components.
pub const DEFAULT_PHASE: i32 = i32::MAX - 100;

/// State shared between the container handle and its consumer task.
struct Shared {
    identity: ContainerIdentity,
    running: AtomicBool,
    fenced: AtomicBool,
    stopped_normally: AtomicBool,
    pause_requested: Arc<AtomicBool>,
    pause_registry: Arc<PauseRegistry>,
    publisher: RwLock<Arc<dyn EventPublisher>>,
    // serializes start and stop; never held while waiting on the consumer task
    lifecycle: tokio::sync::Mutex<()>,
    cycle: Mutex<Option<Arc<RunCycle>>>,
}

impl Shared {
    /// Flip to not running and signal the consumer task. Call with the
    /// lifecycle lock held.
    fn do_stop(&self) -> Option<Arc<RunCycle>> {
        self.running.store(false, Ordering::SeqCst);
        let cycle = self.cycle.lock().clone();
        if let Some(cycle) = &cycle {
            cycle.request_stop();
        }
        cycle
    }

    fn stop_reason(&self) -> StopReason {
        if self.stopped_normally.load(Ordering::SeqCst) {
            StopReason::Normal
        } else {
            StopReason::Abnormal
        }
    }

    fn publish_stopped(&self) {
        let container = self.identity.name();
        let reason = self.stop_reason();
        info!(container = %container, ?reason, "container stopped");
        self.publisher
            .read()
            .publish(ContainerEvent::ContainerStopped { container, reason });
    }

    /// At most once per cycle, however many stop paths race.
    fn publish_stopped_once(&self, cycle: &RunCycle) {
        if cycle.claim_stopped_event() {
            self.publish_stopped();
        }
    }

    fn publish_after_termination(self: &Arc<Self>, cycle: &Arc<RunCycle>, callback: Option<StopCallback>) {
        let shared = self.clone();
        let finished = cycle.clone();
        cycle.on_terminated(Box::new(move || {
            if let Some(callback) = callback {
                callback();
            }
            shared.publish_stopped_once(&finished);
        }));
    }

    fn is_current(&self, cycle: &Arc<RunCycle>) -> bool {
        self.cycle
            .lock()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, cycle))
    }

    /// The consumer task failed: stop abnormally unless a stop is already
    /// under way, and let the stopped event out once the task has terminated.
    /// A cycle that was replaced by a restart only logs.
    async fn fail_cycle(self: &Arc<Self>, cycle: &Arc<RunCycle>) {
        let _guard = self.lifecycle.lock().await;
        if !self.is_current(cycle) {
            warn!("consumer task of a replaced run cycle failed after its stop");
            self.publish_after_termination(cycle, None);
            return;
        }
        self.stopped_normally.store(false, Ordering::SeqCst);
        if self.running.load(Ordering::SeqCst) {
            self.do_stop();
        }
        self.publish_after_termination(cycle, None);
    }
}

async fn drive(poll_loop: &mut dyn PollLoop, ctx: &LoopContext) -> Result<(), ContainerError> {
    while !ctx.is_stop_requested() {
        poll_loop.run_once(ctx).await?;
    }
    Ok(())
}

async fn run_consumer(
    mut poll_loop: Box<dyn PollLoop>,
    ctx: LoopContext,
    cycle: Arc<RunCycle>,
    shared: Arc<Shared>,
) {
    let outcome = AssertUnwindSafe(drive(poll_loop.as_mut(), &ctx))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => debug!("stop requested, leaving poll loop"),
        Ok(Err(e)) => {
            error!(error = %e, "consumer task failed, stopping container");
            shared.fail_cycle(&cycle).await;
        }
        Err(_) => {
            error!("consumer task panicked, stopping container");
            shared.fail_cycle(&cycle).await;
        }
    }

    poll_loop.shutdown(&ctx).await;
    cycle.terminate();
}

/// Runs one consumer task for a [`ContainerProperties`] snapshot and manages
/// its lifecycle.
///
/// Lifecycle operations can be called from any task. Start and stop are
/// serialized by a lifecycle lock; the read-only accessors never wait on it.
/// Stop callbacks run on the consumer task and must not call back into
/// `start` or `stop`.
pub struct ListenerContainer {
    shared: Arc<Shared>,
    properties: Arc<ContainerProperties>,
    consumer_factory: Arc<dyn ConsumerFactory>,
    poll_loop_factory: Arc<dyn PollLoopFactory>,
    admin_factory: Arc<dyn AdminFactory>,
    listener: Mutex<Option<MessageListener>>,
    auto_startup: AtomicBool,
    phase: AtomicI32,
}

impl ListenerContainer {
    pub fn new(properties: ContainerProperties, consumer_factory: Arc<dyn ConsumerFactory>) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity: ContainerIdentity::default(),
                running: AtomicBool::new(false),
                fenced: AtomicBool::new(false),
                stopped_normally: AtomicBool::new(true),
                pause_requested: Arc::new(AtomicBool::new(false)),
                pause_registry: Arc::new(PauseRegistry::new()),
                publisher: RwLock::new(Arc::new(LoggingEventPublisher)),
                lifecycle: tokio::sync::Mutex::new(()),
                cycle: Mutex::new(None),
            }),
            properties: Arc::new(properties),
            consumer_factory,
            poll_loop_factory: Arc::new(ListenerPollLoopFactory::default()),
            admin_factory: Arc::new(KafkaAdminFactory::default()),
            listener: Mutex::new(None),
            auto_startup: AtomicBool::new(true),
            phase: AtomicI32::new(DEFAULT_PHASE),
        }
    }

    pub fn with_poll_loop_factory(mut self, factory: Arc<dyn PollLoopFactory>) -> Self {
        self.poll_loop_factory = factory;
        self
    }

    pub fn with_event_publisher(self, publisher: Arc<dyn EventPublisher>) -> Self {
        *self.shared.publisher.write() = publisher;
        self
    }

    pub fn with_admin_factory(mut self, factory: Arc<dyn AdminFactory>) -> Self {
        self.admin_factory = factory;
        self
    }

    pub fn properties(&self) -> &ContainerProperties {
        &self.properties
    }

    /// Register the listener records are dispatched to. Takes effect on the
    /// next start.
    pub fn setup_message_listener(&self, listener: MessageListener) {
        *self.listener.lock() = Some(listener);
    }

    /// The group id from the container properties, falling back to the
    /// consumer factory's `group.id`.
    pub fn group_id(&self) -> Option<String> {
        if let Some(group_id) = self.properties.group_id() {
            return Some(group_id.to_string());
        }
        self.consumer_factory
            .configuration_properties()
            .get("group.id")
            .filter(|group_id| !group_id.trim().is_empty())
            .cloned()
    }

    fn check_group_id(&self) -> Result<(), ContainerError> {
        if self.properties.topic_selection().is_explicit_assignment() {
            return Ok(());
        }
        match self.group_id() {
            Some(_) => Ok(()),
            None => Err(ContainerError::MissingGroupId),
        }
    }

    /// Start the consumer task. Starting a running container does nothing.
    pub async fn start(&self) -> Result<(), ContainerError> {
        self.check_group_id()?;
        let _guard = self.shared.lifecycle.lock().await;
        if self.is_running() {
            debug!(container = %self.name(), "container already running");
            return Ok(());
        }

        let listener = self
            .listener
            .lock()
            .clone()
            .ok_or(ContainerError::MissingListener)?;
        if self.is_fenced() {
            return Err(ContainerError::Fenced(self.name()));
        }
        listener.validate(self.properties.ack_mode())?;
        check_topics(
            &self.properties,
            &self.consumer_factory.configuration_properties(),
            self.admin_factory.as_ref(),
        )
        .await?;

        self.do_start(listener)
    }

    fn do_start(&self, listener: MessageListener) -> Result<(), ContainerError> {
        let name = self.name();
        let group_id = self.group_id();
        let rebalance_listener: Arc<dyn RebalanceListener> =
            self.properties.rebalance_listener().unwrap_or_else(|| {
                Arc::new(LoggingRebalanceListener::new(
                    group_id.clone().unwrap_or_default(),
                ))
            });

        let poll_loop = self.poll_loop_factory.create(PollLoopRequest {
            container: name.clone(),
            properties: self.properties.clone(),
            listener,
            consumer_factory: self.consumer_factory.clone(),
            group_id: group_id.clone(),
            rebalance_listener,
        })?;

        let cycle = Arc::new(RunCycle::new());
        let ctx = LoopContext::new(
            name.clone(),
            cycle.stop_token(),
            self.shared.pause_requested.clone(),
            self.shared.pause_registry.clone(),
            self.shared.publisher.read().clone(),
        );

        self.shared.stopped_normally.store(true, Ordering::SeqCst);
        *self.shared.cycle.lock() = Some(cycle.clone());
        self.shared.running.store(true, Ordering::SeqCst);

        let span = info_span!(
            "listener_container",
            container = %name,
            group_id = group_id.as_deref().unwrap_or_default()
        );
        tokio::spawn(run_consumer(poll_loop, ctx, cycle, self.shared.clone()).instrument(span));
        info!(container = %name, group_id = ?group_id, "container started");
        Ok(())
    }

    /// Stop and wait for the consumer task, up to the shutdown timeout.
    pub async fn stop(&self) {
        self.stop_with_wait(true).await;
    }

    /// Stop the consumer task. With `wait` the call returns once the task has
    /// terminated or the shutdown timeout passed, and the stopped event has
    /// been published. Without it the event follows termination in the
    /// background.
    pub async fn stop_with_wait(&self, wait: bool) {
        let guard = self.shared.lifecycle.lock().await;
        if !self.is_running() {
            return;
        }
        let Some(cycle) = self.shared.do_stop() else {
            return;
        };
        // publishes even if this call is dropped while waiting
        self.shared.publish_after_termination(&cycle, None);
        if !wait {
            return;
        }
        drop(guard);

        let timeout = self.properties.shutdown_timeout();
        match cycle.await_termination(timeout).await {
            Termination::Completed => debug!(container = %self.name(), "consumer task terminated"),
            Termination::TimedOut => warn!(
                container = %self.name(),
                ?timeout,
                "consumer task did not terminate within the shutdown timeout"
            ),
            Termination::SignalDropped => warn!(
                container = %self.name(),
                "consumer task went away without confirming termination"
            ),
        }
        self.shared.publish_stopped_once(&cycle);
    }

    /// Stop without waiting. `callback` runs once the consumer task has
    /// terminated, or right away when the container is not running.
    pub async fn stop_with_callback(&self, callback: impl FnOnce() + Send + 'static) {
        let guard = self.shared.lifecycle.lock().await;
        if !self.is_running() {
            drop(guard);
            callback();
            return;
        }
        match self.shared.do_stop() {
            Some(cycle) => self
                .shared
                .publish_after_termination(&cycle, Some(Box::new(callback))),
            None => {
                drop(guard);
                callback();
            }
        }
    }

    /// Stop and mark the stop as abnormal. The stopped event is always
    /// published: after termination, or immediately when nothing is running.
    pub async fn stop_abnormally(&self, callback: impl FnOnce() + Send + 'static) {
        let guard = self.shared.lifecycle.lock().await;
        self.shared.stopped_normally.store(false, Ordering::SeqCst);
        let cycle = if self.is_running() {
            self.shared.do_stop()
        } else {
            None
        };
        match cycle {
            Some(cycle) => self
                .shared
                .publish_after_termination(&cycle, Some(Box::new(callback))),
            None => {
                drop(guard);
                callback();
                self.shared.publish_stopped();
            }
        }
    }

    /// Ask the consumer task to pause every assigned partition at its next
    /// iteration.
    pub fn pause(&self) {
        self.shared.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.pause_requested.store(false, Ordering::SeqCst);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.shared.pause_requested.load(Ordering::SeqCst)
    }

    pub fn pause_partition(&self, partition: Partition) {
        if self.shared.pause_registry.pause(partition.clone()) {
            debug!(container = %self.name(), partition = %partition, "partition pause requested");
        }
    }

    pub fn resume_partition(&self, partition: &Partition) {
        if self.shared.pause_registry.resume(partition) {
            debug!(container = %self.name(), partition = %partition, "partition resume requested");
        }
    }

    pub fn is_partition_pause_requested(&self, partition: &Partition) -> bool {
        self.shared.pause_registry.is_pause_requested(partition)
    }

    /// Permanently prevent this container from starting again. A running
    /// consumer task is not affected.
    pub fn fence(&self) {
        self.shared.fenced.store(true, Ordering::SeqCst);
        info!(container = %self.name(), "container fenced");
    }

    pub fn is_fenced(&self) -> bool {
        self.shared.fenced.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// False once the container was stopped abnormally, until the next start.
    pub fn stopped_normally(&self) -> bool {
        self.shared.stopped_normally.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> String {
        self.shared.identity.name()
    }

    pub fn set_name(&self, name: &str) {
        self.shared.identity.set_name(name);
    }

    pub fn listener_id(&self) -> String {
        self.shared.identity.listener_id()
    }

    pub fn main_listener_id(&self) -> Option<String> {
        self.shared.identity.main_listener_id()
    }

    pub fn set_main_listener_id(&self, id: Option<&str>) {
        self.shared.identity.set_main_listener_id(id);
    }

    pub fn listener_info(&self) -> Option<Vec<u8>> {
        self.shared.identity.listener_info()
    }

    pub fn set_listener_info(&self, info: Option<&[u8]>) {
        self.shared.identity.set_listener_info(info);
    }

    pub fn is_auto_startup(&self) -> bool {
        self.auto_startup.load(Ordering::SeqCst)
    }

    pub fn set_auto_startup(&self, auto_startup: bool) {
        self.auto_startup.store(auto_startup, Ordering::SeqCst);
    }

    pub fn phase(&self) -> i32 {
        self.phase.load(Ordering::SeqCst)
    }

    pub fn set_phase(&self, phase: i32) {
        self.phase.store(phase, Ordering::SeqCst);
    }
}

impl Drop for ListenerContainer {
    fn drop(&mut self) {
        if let Some(cycle) = self.shared.cycle.lock().as_ref() {
            cycle.request_stop();
        }
    }
}
