//! Naming conventions shared with dead-letter publishing.

pub const DEFAULT_DLT_SUFFIX: &str = "-dlt";

/// Deliveries of one record, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub fn dlt_topic(topic: &str, suffix: &str) -> String {
    format!("{topic}{suffix}")
}
