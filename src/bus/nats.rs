//! NATS JetStream event bus
//!
//! Each partition is the subject `{subject_prefix}.{partition_id}` of one
//! stream and is read by its own durable pull consumer. The stream sequence
//! is the offset. Consumers use `AckPolicy::All`, so acknowledging the
//! message at an offset acknowledges everything before it.

use super::{Delivery, DeliveryStream, EventBus};
use crate::config::BusConfig;
use crate::error::BusError;
use async_nats::jetstream::{self, consumer, Message};
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

type PendingMessages = Arc<Mutex<HashMap<String, BTreeMap<u64, Message>>>>;

pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    stream_name: String,
    subject_prefix: String,
    consumer_prefix: String,
    /// Delivered but not yet acknowledged messages, per partition by offset
    pending: PendingMessages,
}

impl NatsBus {
    /// Connect to the server and make sure the stream exists
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        info!(url = %config.url, "Connected to NATS");
        Self::new(client, config).await
    }

    pub async fn new(client: Client, config: &BusConfig) -> Result<Self, BusError> {
        let jetstream = jetstream::new(client.clone());
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream.clone(),
                subjects: vec![format!("{}.*", config.subject_prefix)],
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(
            stream = %config.stream,
            subjects = %format!("{}.*", config.subject_prefix),
            "JetStream stream ready"
        );

        Ok(Self {
            client,
            jetstream,
            stream_name: config.stream.clone(),
            subject_prefix: config.subject_prefix.clone(),
            consumer_prefix: config.consumer_prefix.clone(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Underlying client, shared with the alert publisher
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn subject_for(&self, partition_id: &str) -> String {
        format!("{}.{}", self.subject_prefix, partition_id)
    }

    fn consumer_name(&self, partition_id: &str) -> String {
        format!("{}-{}", self.consumer_prefix, partition_id)
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn subscribe(
        &self,
        partition_id: &str,
        resume_after: Option<u64>,
    ) -> Result<DeliveryStream, BusError> {
        let subscribe_error = |reason: String| BusError::Subscribe {
            partition_id: partition_id.to_string(),
            reason,
        };

        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        // Only applies when the durable consumer is created; an existing one
        // resumes from its own ack floor.
        let deliver_policy = match resume_after {
            Some(offset) => consumer::DeliverPolicy::ByStartSequence {
                start_sequence: offset + 1,
            },
            None => consumer::DeliverPolicy::All,
        };

        let name = self.consumer_name(partition_id);
        let pull_consumer: consumer::PullConsumer = stream
            .get_or_create_consumer(
                &name,
                consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subject: self.subject_for(partition_id),
                    deliver_policy,
                    ack_policy: consumer::AckPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        let messages = pull_consumer
            .messages()
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        info!(
            partition = %partition_id,
            consumer = %name,
            resume_after = ?resume_after,
            "Subscribed to partition"
        );

        let pending = self.pending.clone();
        let partition = partition_id.to_string();

        Ok(messages
            .map(move |item| {
                let delivery_error = |reason: String| BusError::Delivery {
                    partition_id: partition.clone(),
                    reason,
                };

                let message = item.map_err(|e| delivery_error(e.to_string()))?;
                let offset = message
                    .info()
                    .map_err(|e| delivery_error(e.to_string()))?
                    .stream_sequence;
                let payload = message.message.payload.to_vec();

                pending
                    .lock()
                    .entry(partition.clone())
                    .or_default()
                    .insert(offset, message);

                Ok(Delivery {
                    partition_id: partition.clone(),
                    offset,
                    payload,
                })
            })
            .boxed())
    }

    async fn ack_position(&self, partition_id: &str, offset: u64) -> Result<(), BusError> {
        // Take every pending message up to `offset`; acking the last one
        // covers the rest under AckPolicy::All.
        let last = {
            let mut pending = self.pending.lock();
            let Some(messages) = pending.get_mut(partition_id) else {
                return Ok(());
            };
            let newer = messages.split_off(&(offset + 1));
            let acked = std::mem::replace(messages, newer);
            acked.into_iter().next_back()
        };

        let Some((acked_offset, message)) = last else {
            return Ok(());
        };

        message.ack().await.map_err(|e| BusError::Ack {
            partition_id: partition_id.to_string(),
            offset: acked_offset,
            reason: e.to_string(),
        })?;

        debug!(partition = %partition_id, offset = acked_offset, "Acknowledged bus position");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running NATS server with JetStream
}
