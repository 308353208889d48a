use crate::config::KafkaConfig;
use crate::handler::{SourceEvent, TriggerHandler};
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// S3 event notification envelope as delivered on the notifications topic.
///
/// Only the fields the pipeline consumes are modeled; everything else in the
/// notification is ignored.
#[derive(Debug, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ObjectEntity {
    pub key: String,
}

impl NotificationRecord {
    /// Reduce a notification record to the event the handler consumes.
    ///
    /// S3 notifications URL-encode object keys (spaces arrive as `+`), so
    /// the key is decoded here, at the transport boundary.
    pub fn to_source_event(&self) -> SourceEvent {
        SourceEvent {
            bucket: self.s3.bucket.name.clone(),
            key: decode_object_key(&self.s3.object.key),
        }
    }
}

/// Decode `+` and percent-escapes in an S3-notification object key.
pub fn decode_object_key(raw: &str) -> String {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '+' => bytes.push(b' '),
            '%' => {
                let hex: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 => bytes.push(byte),
                    _ => {
                        bytes.push(b'%');
                        bytes.extend_from_slice(hex.as_bytes());
                    }
                }
            }
            other => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kafka consumer that drives the trigger handler, one notification per
/// message.
pub struct EventKafkaConsumer {
    consumer: StreamConsumer,
    handler: Arc<TriggerHandler>,
}

impl EventKafkaConsumer {
    /// Create a consumer subscribed to the notifications topic.
    pub fn new(config: &KafkaConfig, handler: Arc<TriggerHandler>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval_ms.to_string(),
            );

        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.notifications_topic])
            .context("Failed to subscribe to notifications topic")?;

        info!(
            topic = %config.notifications_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self { consumer, handler })
    }

    /// Consume notifications until the stream ends or the task is aborted.
    ///
    /// Handler failures are logged and counted but do not stop the stream;
    /// whether a failed invocation is redelivered is the broker's policy,
    /// not this service's.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting notification consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => {
                    if let Err(e) = self.process_message(&message).await {
                        error!(
                            error = %e,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process notification"
                        );
                        metrics::counter!("dailycsv.messages.failed").increment(1);
                    } else {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                        metrics::counter!("dailycsv.messages.processed").increment(1);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("dailycsv.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Process one Kafka message carrying an S3 notification envelope.
    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let payload = message.payload().context("Message has no payload")?;

        let envelope: NotificationEnvelope =
            serde_json::from_slice(payload).context("Failed to deserialize notification")?;

        // One notification per invocation; anything past the first record is
        // unexpected from the configured notification setup.
        if envelope.records.len() > 1 {
            warn!(
                records = envelope.records.len(),
                "Notification carries multiple records; only the first is processed"
            );
        }

        let record = envelope
            .records
            .first()
            .context("Notification has no records")?;
        let event = record.to_source_event();

        debug!(bucket = %event.bucket, key = %event.key, "Decoded notification");

        self.handler.handle(&event).await?;
        Ok(())
    }
}
