pub mod acknowledgment;
pub mod config;
pub mod consumer;
pub mod container;
pub mod error;
pub mod error_handler;
pub mod events;
pub mod identity;
pub mod interceptor;
pub mod listener;
pub mod pause;
pub mod poll_loop;
pub mod properties;
pub mod rebalance;
pub mod retry_topic;
pub mod shutdown;
pub mod test_utils;
pub mod topic_check;
pub mod transaction;
pub mod types;

pub use container::ListenerContainer;
pub use error::{ContainerError, ErrorKind, ListenerError};
pub use properties::{AckMode, ContainerProperties};
pub use types::{ConsumerRecord, Partition, TopicPartitionOffset};
