use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
#[cfg(test)]
use mockall::automock;
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::{ClientError, ContainerError};
use crate::properties::ContainerProperties;

/// Consumer settings that also apply to an admin client.
pub const ADMIN_CONFIG_KEYS: &[&str] = &[
    "bootstrap.servers",
    "client.id",
    "client.dns.lookup",
    "client.rack",
    "connections.max.idle.ms",
    "metadata.max.age.ms",
    "topic.metadata.refresh.interval.ms",
    "reconnect.backoff.ms",
    "reconnect.backoff.max.ms",
    "retry.backoff.ms",
    "retry.backoff.max.ms",
    "request.timeout.ms",
    "socket.timeout.ms",
    "socket.connection.setup.timeout.ms",
    "security.protocol",
    "enable.ssl.certificate.verification",
    "api.version.request",
    "broker.version.fallback",
];

const ADMIN_CONFIG_PREFIXES: &[&str] = &["ssl.", "sasl."];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescribeError {
    #[error("topic {0} does not exist")]
    UnknownTopic(String),
    #[error("failed to fetch topic metadata: {0}")]
    Metadata(String),
}

pub type DescribeFuture = BoxFuture<'static, Result<(), DescribeError>>;

/// Batched topic lookup. Each topic resolves independently so a slow or
/// failing lookup only affects the topics it covers.
#[cfg_attr(test, automock)]
pub trait TopicDescriber: Send + Sync {
    fn describe_topics(&self, topics: &[String]) -> HashMap<String, DescribeFuture>;
}

pub trait AdminFactory: Send + Sync {
    fn create_describer(
        &self,
        config: &HashMap<String, String>,
    ) -> Result<Box<dyn TopicDescriber>, ClientError>;
}

pub struct KafkaAdminFactory {
    metadata_timeout: Duration,
}

impl KafkaAdminFactory {
    pub fn new(metadata_timeout: Duration) -> Self {
        Self { metadata_timeout }
    }
}

impl Default for KafkaAdminFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl AdminFactory for KafkaAdminFactory {
    fn create_describer(
        &self,
        config: &HashMap<String, String>,
    ) -> Result<Box<dyn TopicDescriber>, ClientError> {
        let mut client_config = ClientConfig::new();
        for (key, value) in config {
            client_config.set(key, value);
        }
        let client: AdminClient<DefaultClientContext> = client_config.create()?;
        Ok(Box::new(KafkaTopicDescriber {
            client: Arc::new(client),
            metadata_timeout: self.metadata_timeout,
        }))
    }
}

pub struct KafkaTopicDescriber {
    client: Arc<AdminClient<DefaultClientContext>>,
    metadata_timeout: Duration,
}

impl TopicDescriber for KafkaTopicDescriber {
    fn describe_topics(&self, topics: &[String]) -> HashMap<String, DescribeFuture> {
        let client = self.client.clone();
        let timeout = self.metadata_timeout;

        // One metadata request answers every topic
        let metadata = tokio::task::spawn_blocking(move || {
            client
                .inner()
                .fetch_metadata(None, timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .filter(|topic| topic.error().is_none())
                        .map(|topic| topic.name().to_string())
                        .collect::<HashSet<String>>()
                })
                .map(Arc::new)
                .map_err(|e| DescribeError::Metadata(e.to_string()))
        })
        .map(|joined| joined.unwrap_or_else(|e| Err(DescribeError::Metadata(e.to_string()))))
        .boxed()
        .shared();

        topics
            .iter()
            .map(|topic| {
                let metadata = metadata.clone();
                let name = topic.clone();
                let lookup = async move {
                    let existing = metadata.await?;
                    if existing.contains(&name) {
                        Ok(())
                    } else {
                        Err(DescribeError::UnknownTopic(name))
                    }
                }
                .boxed();
                (topic.clone(), lookup)
            })
            .collect()
    }
}

/// Admin settings derived from the consumer configuration, with every
/// container-level override applied on top.
pub fn admin_config(
    consumer_config: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut config: HashMap<String, String> = consumer_config
        .iter()
        .filter(|(key, _)| {
            ADMIN_CONFIG_KEYS.contains(&key.as_str())
                || ADMIN_CONFIG_PREFIXES.iter().any(|p| key.starts_with(p))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    config.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    config
}

/// Fails with [`ContainerError::MissingTopics`] when missing topics are fatal
/// and any configured topic cannot be confirmed within the check timeout.
/// Pattern subscriptions are never checked. If no admin client can be
/// created the check is skipped.
pub async fn check_topics(
    properties: &ContainerProperties,
    consumer_config: &HashMap<String, String>,
    admin: &dyn AdminFactory,
) -> Result<(), ContainerError> {
    if !properties.missing_topics_fatal() || properties.topic_selection().is_pattern() {
        return Ok(());
    }

    let config = admin_config(consumer_config, properties.consumer_overrides());
    let describer = match admin.create_describer(&config) {
        Ok(describer) => describer,
        Err(e) => {
            error!(error = %e, "Failed to check topic existence");
            return Ok(());
        }
    };

    let topics = properties.topic_selection().topic_names();
    let wait = properties.topic_check_timeout();
    let mut pending = describer.describe_topics(&topics);

    let checks = topics.iter().map(|topic| {
        let lookup = pending.remove(topic);
        async move {
            let present = match lookup {
                Some(lookup) => match tokio::time::timeout(wait, lookup).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!(topic = %topic, error = %e, "topic lookup failed");
                        false
                    }
                    Err(_) => {
                        debug!(topic = %topic, "topic lookup timed out");
                        false
                    }
                },
                None => false,
            };
            (topic, present)
        }
    });

    let missing: Vec<String> = join_all(checks)
        .await
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(topic, _)| topic.clone())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        warn!(?missing, "configured topics are not present");
        Err(ContainerError::MissingTopics(missing))
    }
}
