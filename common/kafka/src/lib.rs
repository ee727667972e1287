pub mod config;
pub mod kafka_producer;
pub mod test;
pub mod transaction;

/// Default `delivery.timeout.ms` applied by librdkafka when the producer config doesn't set one.
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 300_000;
