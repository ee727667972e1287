use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

impl KafkaConfig {
    /// Base producer settings shared by the plain and the transactional producer.
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", self.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                self.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", self.kafka_compression_codec.to_owned())
            .set(
                "queue.buffering.max.kbytes",
                (self.kafka_producer_queue_mib * 1024).to_string(),
            )
            .set(
                "queue.buffering.max.messages",
                self.kafka_producer_queue_messages.to_string(),
            );

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        client_config
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    // Optional here: a listener container may carry its own group id, and
    // explicitly assigned partitions don't need one at all.
    pub kafka_consumer_group: Option<String>,

    // We default to "earliest" for this, but if you're bringing up a new service, you probably want "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "10000")]
    pub kafka_socket_timeout_ms: u32,

    #[envconfig(default = "60000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "5000")]
    pub kafka_heartbeat_interval_ms: u32,

    #[envconfig(default = "300000")]
    pub kafka_max_poll_interval_ms: u32,
}

impl ConsumerConfig {
    /// The consumer-level properties a listener container sees through its
    /// consumer factory. Offsets are always stored and committed by the
    /// container, never automatically.
    pub fn properties(&self) -> Vec<(String, String)> {
        let mut props = vec![
            ("bootstrap.servers".to_string(), self.kafka_hosts.clone()),
            (
                "auto.offset.reset".to_string(),
                self.kafka_consumer_offset_reset.clone(),
            ),
            ("enable.auto.offset.store".to_string(), "false".to_string()),
            ("enable.auto.commit".to_string(), "false".to_string()),
            (
                "socket.timeout.ms".to_string(),
                self.kafka_socket_timeout_ms.to_string(),
            ),
            (
                "session.timeout.ms".to_string(),
                self.kafka_session_timeout_ms.to_string(),
            ),
            (
                "heartbeat.interval.ms".to_string(),
                self.kafka_heartbeat_interval_ms.to_string(),
            ),
            (
                "max.poll.interval.ms".to_string(),
                self.kafka_max_poll_interval_ms.to_string(),
            ),
        ];

        if let Some(group) = self.kafka_consumer_group.as_ref().filter(|g| !g.is_empty()) {
            props.push(("group.id".to_string(), group.clone()));
        }

        if self.kafka_tls {
            props.push(("security.protocol".to_string(), "ssl".to_string()));
            props.push((
                "enable.ssl.certificate.verification".to_string(),
                "false".to_string(),
            ));
        }

        props
    }
}
