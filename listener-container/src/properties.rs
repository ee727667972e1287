use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::error::ContainerError;
use crate::rebalance::RebalanceListener;
use crate::types::TopicPartitionOffset;

/// When the container commits offsets of processed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckMode {
    /// Commit after each record is processed.
    Record,
    /// Commit once every record returned by a poll has been processed.
    Batch,
    /// Commit after a poll once `ack_time` has elapsed since the last commit.
    Time,
    /// Commit after a poll once `ack_count` records have been processed since the last commit.
    Count,
    /// `Time` or `Count`, whichever is reached first.
    CountTime,
    /// The listener acknowledges; acknowledgments are committed after the poll is processed.
    Manual,
    /// The listener acknowledges; each acknowledgment is committed right away.
    ManualImmediate,
}

impl AckMode {
    pub fn is_manual(&self) -> bool {
        matches!(self, AckMode::Manual | AckMode::ManualImmediate)
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "record" => Ok(AckMode::Record),
            "batch" => Ok(AckMode::Batch),
            "time" => Ok(AckMode::Time),
            "count" => Ok(AckMode::Count),
            "count_time" => Ok(AckMode::CountTime),
            "manual" => Ok(AckMode::Manual),
            "manual_immediate" => Ok(AckMode::ManualImmediate),
            other => Err(format!("unknown ack mode: {other}")),
        }
    }
}

/// Which partitions the container consumes. Fixed for the container's lifetime.
#[derive(Debug, Clone)]
pub enum TopicSelection {
    Topics(Vec<String>),
    Pattern(Regex),
    Partitions(Vec<TopicPartitionOffset>),
}

impl TopicSelection {
    /// Topic names to verify before starting. Pattern subscriptions have none.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let candidates: Vec<&str> = match self {
            TopicSelection::Topics(topics) => topics.iter().map(String::as_str).collect(),
            TopicSelection::Partitions(partitions) => {
                partitions.iter().map(TopicPartitionOffset::topic).collect()
            }
            TopicSelection::Pattern(_) => Vec::new(),
        };
        for name in candidates {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, TopicSelection::Pattern(_))
    }

    pub fn is_explicit_assignment(&self) -> bool {
        matches!(self, TopicSelection::Partitions(_))
    }
}

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TOPIC_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ACK_TIME: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;

/// Immutable settings for one listener container.
#[derive(Clone)]
pub struct ContainerProperties {
    topic_selection: TopicSelection,
    group_id: Option<String>,
    ack_mode: AckMode,
    ack_count: usize,
    ack_time: Duration,
    sub_batch_per_partition: bool,
    shutdown_timeout: Duration,
    missing_topics_fatal: bool,
    topic_check_timeout: Duration,
    rebalance_listener: Option<Arc<dyn RebalanceListener>>,
    consumer_overrides: HashMap<String, String>,
    poll_timeout: Duration,
    max_poll_records: usize,
    intercept_before_tx: bool,
    ack_after_handle: bool,
}

impl ContainerProperties {
    pub fn builder() -> ContainerPropertiesBuilder {
        ContainerPropertiesBuilder::default()
    }

    pub fn topic_selection(&self) -> &TopicSelection {
        &self.topic_selection
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref().filter(|g| !g.trim().is_empty())
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn ack_count(&self) -> usize {
        self.ack_count
    }

    pub fn ack_time(&self) -> Duration {
        self.ack_time
    }

    pub fn sub_batch_per_partition(&self) -> bool {
        self.sub_batch_per_partition
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn missing_topics_fatal(&self) -> bool {
        self.missing_topics_fatal
    }

    pub fn topic_check_timeout(&self) -> Duration {
        self.topic_check_timeout
    }

    pub fn rebalance_listener(&self) -> Option<Arc<dyn RebalanceListener>> {
        self.rebalance_listener.clone()
    }

    pub fn consumer_overrides(&self) -> &HashMap<String, String> {
        &self.consumer_overrides
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn max_poll_records(&self) -> usize {
        self.max_poll_records
    }

    pub fn intercept_before_tx(&self) -> bool {
        self.intercept_before_tx
    }

    /// Whether a record handed to the recoverer has its offset committed right away.
    pub fn ack_after_handle(&self) -> bool {
        self.ack_after_handle
    }
}

pub struct ContainerPropertiesBuilder {
    topics: Option<Vec<String>>,
    topic_pattern: Option<String>,
    topic_partitions: Option<Vec<TopicPartitionOffset>>,
    group_id: Option<String>,
    ack_mode: AckMode,
    ack_count: usize,
    ack_time: Duration,
    sub_batch_per_partition: bool,
    shutdown_timeout: Duration,
    missing_topics_fatal: bool,
    topic_check_timeout: Duration,
    rebalance_listener: Option<Arc<dyn RebalanceListener>>,
    consumer_overrides: HashMap<String, String>,
    poll_timeout: Duration,
    max_poll_records: usize,
    intercept_before_tx: bool,
    ack_after_handle: bool,
}

impl Default for ContainerPropertiesBuilder {
    fn default() -> Self {
        Self {
            topics: None,
            topic_pattern: None,
            topic_partitions: None,
            group_id: None,
            ack_mode: AckMode::Batch,
            ack_count: 1,
            ack_time: DEFAULT_ACK_TIME,
            sub_batch_per_partition: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            missing_topics_fatal: false,
            topic_check_timeout: DEFAULT_TOPIC_CHECK_TIMEOUT,
            rebalance_listener: None,
            consumer_overrides: HashMap::new(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            intercept_before_tx: true,
            ack_after_handle: true,
        }
    }
}

impl ContainerPropertiesBuilder {
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    pub fn topic_pattern(mut self, pattern: &str) -> Self {
        self.topic_pattern = Some(pattern.to_string());
        self
    }

    pub fn topic_partitions(mut self, partitions: Vec<TopicPartitionOffset>) -> Self {
        self.topic_partitions = Some(partitions);
        self
    }

    pub fn group_id(mut self, group_id: &str) -> Self {
        self.group_id = Some(group_id.to_string());
        self
    }

    pub fn ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn ack_count(mut self, count: usize) -> Self {
        self.ack_count = count;
        self
    }

    pub fn ack_time(mut self, time: Duration) -> Self {
        self.ack_time = time;
        self
    }

    pub fn sub_batch_per_partition(mut self, enabled: bool) -> Self {
        self.sub_batch_per_partition = enabled;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn missing_topics_fatal(mut self, fatal: bool) -> Self {
        self.missing_topics_fatal = fatal;
        self
    }

    pub fn topic_check_timeout(mut self, timeout: Duration) -> Self {
        self.topic_check_timeout = timeout;
        self
    }

    pub fn rebalance_listener(mut self, listener: Arc<dyn RebalanceListener>) -> Self {
        self.rebalance_listener = Some(listener);
        self
    }

    pub fn consumer_override(mut self, key: &str, value: &str) -> Self {
        self.consumer_overrides
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max;
        self
    }

    pub fn intercept_before_tx(mut self, before: bool) -> Self {
        self.intercept_before_tx = before;
        self
    }

    pub fn ack_after_handle(mut self, ack: bool) -> Self {
        self.ack_after_handle = ack;
        self
    }

    pub fn build(self) -> Result<ContainerProperties, ContainerError> {
        let selected = [
            self.topics.is_some(),
            self.topic_pattern.is_some(),
            self.topic_partitions.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if selected != 1 {
            return Err(ContainerError::InvalidTopicSelection(selected));
        }

        let topic_selection = if let Some(topics) = self.topics {
            if topics.is_empty() || topics.iter().any(|t| t.trim().is_empty()) {
                return Err(ContainerError::InvalidConfig(
                    "topics must be non-empty names".to_string(),
                ));
            }
            TopicSelection::Topics(topics)
        } else if let Some(pattern) = self.topic_pattern {
            let regex =
                Regex::new(&pattern).map_err(|source| ContainerError::InvalidTopicPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            TopicSelection::Pattern(regex)
        } else {
            let partitions = self.topic_partitions.unwrap_or_default();
            if partitions.is_empty() {
                return Err(ContainerError::InvalidConfig(
                    "topic partitions must not be empty".to_string(),
                ));
            }
            TopicSelection::Partitions(partitions)
        };

        if self.max_poll_records == 0 {
            return Err(ContainerError::InvalidConfig(
                "max poll records must be at least 1".to_string(),
            ));
        }

        Ok(ContainerProperties {
            topic_selection,
            group_id: self.group_id,
            ack_mode: self.ack_mode,
            ack_count: self.ack_count.max(1),
            ack_time: self.ack_time,
            sub_batch_per_partition: self.sub_batch_per_partition,
            shutdown_timeout: self.shutdown_timeout,
            missing_topics_fatal: self.missing_topics_fatal,
            topic_check_timeout: self.topic_check_timeout,
            rebalance_listener: self.rebalance_listener,
            consumer_overrides: self.consumer_overrides,
            poll_timeout: self.poll_timeout,
            max_poll_records: self.max_poll_records,
            intercept_before_tx: self.intercept_before_tx,
            ack_after_handle: self.ack_after_handle,
        })
    }
}
