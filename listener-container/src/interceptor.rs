use crate::error::ListenerError;
use crate::types::ConsumerRecord;

/// Hooks around record delivery.
///
/// `intercept` runs before the listener and may replace the record or veto
/// delivery by returning `None`; a vetoed record counts as processed and gets
/// no further hooks. For a delivered record `success` or `failure` runs, then
/// `after_record` runs last.
pub trait RecordInterceptor: Send + Sync {
    fn intercept(&self, record: ConsumerRecord) -> Option<ConsumerRecord>;

    fn success(&self, _record: &ConsumerRecord) {}

    fn failure(&self, _record: &ConsumerRecord, _error: &ListenerError) {}

    fn after_record(&self, _record: &ConsumerRecord) {}
}

/// Hooks around batch delivery, with the same contract as [`RecordInterceptor`].
pub trait BatchInterceptor: Send + Sync {
    fn intercept(&self, records: Vec<ConsumerRecord>) -> Option<Vec<ConsumerRecord>>;

    fn success(&self, _records: &[ConsumerRecord]) {}

    fn failure(&self, _records: &[ConsumerRecord], _error: &ListenerError) {}
}
