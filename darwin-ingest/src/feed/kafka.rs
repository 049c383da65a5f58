//! Kafka connection using rdkafka's `StreamConsumer`.

use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::FeedSettings;

use super::{Envelope, FeedConnection, FeedError};

/// A Kafka consumer subscribed to the feed topic.
///
/// Auto-commit is disabled: offsets only move when [`FeedConnection::commit`]
/// is called after a message has been stored.
pub struct KafkaFeed {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl std::fmt::Debug for KafkaFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaFeed")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaFeed {
    /// Create the consumer and subscribe to the configured topic.
    pub fn connect(settings: &FeedSettings) -> Result<Self, FeedError> {
        let timeout_ms = settings.connect_timeout.as_millis().to_string();

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("socket.connection.setup.timeout.ms", &timeout_ms)
            .set("session.timeout.ms", "45000");

        if let Some(credentials) = &settings.credentials {
            config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", &credentials.username)
                .set("sasl.password", &credentials.password);
        }

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| FeedError::Connect(format!("failed to create consumer: {e}")))?;
        consumer
            .subscribe(&[settings.topic.as_str()])
            .map_err(|e| FeedError::Connect(format!("failed to subscribe: {e}")))?;

        info!(
            brokers = %settings.brokers,
            group = %settings.group,
            topic = %settings.topic,
            "subscribed to feed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: settings.topic.clone(),
        })
    }
}

#[async_trait]
impl FeedConnection for KafkaFeed {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Option<Envelope>, FeedError> {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(None),
            msg = self.consumer.recv() => msg,
        };
        let msg = received.map_err(|e| FeedError::Fetch(e.to_string()))?;

        Ok(Some(Envelope {
            key: msg.key().map(<[u8]>::to_vec),
            value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition: msg.partition(),
            offset: msg.offset(),
        }))
    }

    async fn commit(&self, partition: i32, offset: i64) -> Result<(), FeedError> {
        let failed = |reason: String| FeedError::Commit {
            partition,
            offset,
            reason,
        };

        // Kafka expects the offset of the next message to read.
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
        .map_err(|e| failed(e.to_string()))?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| failed(e.to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        debug!(partition, offset, "committed");
        Ok(())
    }
}
