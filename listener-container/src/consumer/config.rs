use std::collections::HashMap;

use rdkafka::ClientConfig;

/// Consumer configuration builder with the defaults listener containers rely on.
///
/// Offsets are never stored or committed automatically: the container stores
/// them as records are processed and commits according to its ack mode.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    /// Start from already-resolved properties, as handed out by a consumer factory.
    pub fn from_properties<'a>(
        properties: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let mut config = ClientConfig::new();
        for (key, value) in properties {
            config.set(key, value);
        }
        config
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false");
        Self { config }
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    pub fn with_group_id(mut self, group_id: &str) -> Self {
        self.config.set("group.id", group_id);
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.config.set("client.id", client_id);
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// Container-level overrides win over everything set so far, except the
    /// offset store and commit switches the container depends on.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (key, value) in overrides {
            if key == "enable.auto.offset.store" || key == "enable.auto.commit" {
                continue;
            }
            self.config.set(key, value);
        }
        self
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
