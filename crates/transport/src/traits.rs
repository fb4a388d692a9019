use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::TransportError;

/// Publishes envelopes to one or more subscribers via PUB/SUB pattern.
///
/// Publishers send topic-filtered messages to all connected subscribers.
/// This is the broadcast side of the fan-out pattern.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an envelope. Subscribers filter by the envelope's topic.
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Force any buffered outbound frames out before proceeding. A no-op for
    /// transports with no internal buffering; ZMQ's PUB socket does buffer,
    /// so [`MessageHandler::send`](crate::handler::MessageHandler::send)
    /// calls this between its `start_send`/`end_send` breadcrumbs.
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        (**self).publish(envelope).await
    }

    async fn flush(&self) -> Result<(), TransportError> {
        (**self).flush().await
    }
}

/// Subscribes to envelopes matching topic filters via PUB/SUB pattern.
///
/// Subscribers connect to a publisher and receive envelopes whose topics
/// match the subscribed prefixes.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to envelopes with topics matching the given prefix.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), TransportError>;

    /// Receive the next envelope. Blocks until one is available.
    async fn recv(&self) -> Result<Envelope, TransportError>;
}
