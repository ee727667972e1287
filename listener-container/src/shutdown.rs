use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub type StopCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    TimedOut,
    /// The completion signal went away without firing.
    SignalDropped,
}

/// One start-to-stop lifetime of a consumer task.
///
/// Holds the cooperative stop signal, the callbacks to run once the task has
/// terminated, and the guard that lets exactly one stopped event out per cycle.
pub struct RunCycle {
    stop: CancellationToken,
    // None once the task has terminated
    callbacks: Mutex<Option<Vec<StopCallback>>>,
    stopped_event_claimed: AtomicBool,
}

impl Default for RunCycle {
    fn default() -> Self {
        Self {
            stop: CancellationToken::new(),
            callbacks: Mutex::new(Some(Vec::new())),
            stopped_event_claimed: AtomicBool::new(false),
        }
    }
}

impl RunCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_terminated(&self) -> bool {
        self.callbacks.lock().is_none()
    }

    /// Run `callback` once the consumer task has terminated, or right away if
    /// it already has.
    pub fn on_terminated(&self, callback: StopCallback) {
        let mut callbacks = self.callbacks.lock();
        if let Some(pending) = callbacks.as_mut() {
            pending.push(callback);
            return;
        }
        drop(callbacks);
        callback();
    }

    /// Called by the consumer task as its very last step.
    pub fn terminate(&self) {
        let callbacks = self.callbacks.lock().take().unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }

    pub async fn await_termination(&self, timeout: Duration) -> Termination {
        let (tx, rx) = oneshot::channel();
        self.on_terminated(Box::new(move || {
            tx.send(()).ok();
        }));
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Termination::Completed,
            Ok(Err(_)) => Termination::SignalDropped,
            Err(_) => Termination::TimedOut,
        }
    }

    /// True for the first caller only.
    pub fn claim_stopped_event(&self) -> bool {
        !self.stopped_event_claimed.swap(true, Ordering::SeqCst)
    }
}
