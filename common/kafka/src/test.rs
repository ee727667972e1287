use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::kafka_producer::create_kafka_producer;

pub async fn create_mock_kafka() -> (MockCluster<'static, DefaultProducerContext>, FutureProducer) {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");

    let config = KafkaConfig {
        kafka_producer_linger_ms: 0,
        kafka_producer_queue_mib: 50,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "none".to_string(),
        kafka_hosts: cluster.bootstrap_servers(),
        kafka_tls: false,
        kafka_producer_queue_messages: 1000,
    };

    (
        cluster,
        create_kafka_producer(&config)
            .await
            .expect("failed to create mocked kafka producer"),
    )
}

/// Consumer settings pointed at a mock cluster.
pub fn mock_consumer_config(bootstrap_servers: String, group: Option<&str>) -> ConsumerConfig {
    ConsumerConfig {
        kafka_consumer_group: group.map(str::to_string),
        kafka_consumer_offset_reset: "earliest".to_string(),
        kafka_tls: false,
        kafka_hosts: bootstrap_servers,
        kafka_socket_timeout_ms: 5000,
        kafka_session_timeout_ms: 6000,
        kafka_heartbeat_interval_ms: 500,
        kafka_max_poll_interval_ms: 10000,
    }
}
