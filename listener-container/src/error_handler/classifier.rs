use crate::error::{ErrorKind, ListenerError};

pub trait ErrorClassifier: Send + Sync {
    fn is_retryable(&self, error: &ListenerError) -> bool;
}

type CauseMatcher = Box<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Retries whatever the listener marked [`ErrorKind::Retryable`], unless the
/// cause chain contains an error type registered as not retryable.
#[derive(Default)]
pub struct DefaultErrorClassifier {
    not_retryable: Vec<CauseMatcher>,
}

impl DefaultErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn not_retryable<E>(mut self) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.not_retryable
            .push(Box::new(|cause: &anyhow::Error| {
                cause.chain().any(|e| e.is::<E>())
            }));
        self
    }
}

impl ErrorClassifier for DefaultErrorClassifier {
    fn is_retryable(&self, error: &ListenerError) -> bool {
        error.kind() == ErrorKind::Retryable
            && !self
                .not_retryable
                .iter()
                .any(|matcher| matcher(error.cause()))
    }
}
