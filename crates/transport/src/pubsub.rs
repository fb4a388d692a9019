use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::traits::{EventPublisher, EventSubscriber};
use crate::transport::Transport;

/// ZeroMQ PUB socket publisher that connects to the broker's frontend.
///
/// Envelopes are sent as two-frame ZMQ messages:
/// 1. Topic string (used by SUB sockets for prefix filtering)
/// 2. MessagePack-encoded [`Envelope`]
///
/// The publisher connects to the broker's frontend (SUB socket),
/// which subscribes to all topics and forwards them to the backend (PUB socket).
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqPublisher {
    /// Create a new publisher that connects to the broker's frontend endpoint.
    ///
    /// # Arguments
    /// * `transport` - The broker frontend endpoint (where the broker's SUB socket binds).
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, TransportError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting PUB socket to broker frontend");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Create a new publisher that binds to the given endpoint.
    ///
    /// Use this for direct PUB/SUB without a broker (publisher binds, subscribers connect).
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, TransportError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    /// Publish an envelope as a two-frame ZMQ message: [topic, envelope].
    ///
    /// The topic frame enables subscriber-side prefix filtering.
    async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
        let topic = envelope.topic.clone();
        let envelope_bytes = envelope.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(topic.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(topic = %topic, "published envelope");
        Ok(())
    }

    /// `PubSocket::send` already writes the frame to the underlying socket
    /// before returning; `zeromq` exposes no separate buffered-flush call,
    /// so there is nothing further to force out here.
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// ZeroMQ SUB socket subscriber that connects to the broker's backend.
///
/// Receives two-frame ZMQ messages:
/// 1. Topic string (used for prefix matching)
/// 2. MessagePack-encoded [`Envelope`]
///
/// The subscriber connects to the broker's backend (PUB socket),
/// which forwards messages received from publishers on the frontend.
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
}

impl ZmqSubscriber {
    /// Create a new subscriber that connects to the broker's backend endpoint.
    ///
    /// # Arguments
    /// * `transport` - The broker backend endpoint (where the broker's PUB socket binds).
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, TransportError> {
        let mut socket = SubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting SUB socket to broker backend");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Create a new subscriber that connects directly to a publisher (no broker).
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect_direct(transport: &Transport) -> Result<Self, TransportError> {
        Self::connect(transport).await
    }
}

#[async_trait]
impl EventSubscriber for ZmqSubscriber {
    /// Subscribe to envelopes with topics matching the given prefix.
    ///
    /// An empty string subscribes to all topics. Multiple subscriptions
    /// can be active simultaneously.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), TransportError> {
        let mut socket = self.socket.lock().await;
        socket.subscribe(topic_prefix).await?;
        info!(topic_prefix = %topic_prefix, "subscribed to topic prefix");
        Ok(())
    }

    /// Receive the next envelope. Blocks until one matching a subscription arrives.
    async fn recv(&self) -> Result<Envelope, TransportError> {
        let mut socket = self.socket.lock().await;
        let zmq_msg = socket.recv().await?;

        // In zeromq-rs, PUB/SUB sends the topic as a prefix of the first frame
        // for single-frame messages, or as separate frames for multi-frame messages.
        // Since we explicitly send two frames, we expect frame[1] to be our envelope.
        let frames: Vec<_> = zmq_msg.iter().collect();

        if frames.len() >= 2 {
            let envelope_bytes = frames[1].as_ref();
            let envelope = Envelope::from_bytes(envelope_bytes)?;
            debug!(topic = %envelope.topic, "received envelope");
            Ok(envelope)
        } else if !frames.is_empty() {
            // Single-frame fallback: the entire frame is the envelope.
            let envelope_bytes = frames[0].as_ref();
            let envelope = Envelope::from_bytes(envelope_bytes)?;
            debug!(topic = %envelope.topic, "received single-frame envelope");
            Ok(envelope)
        } else {
            Err(TransportError::Transport("empty ZMQ message".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zmq_message_two_frame_construction() {
        let topic = "kairos.test.topic";
        let payload_bytes = b"test-payload";

        let mut msg = ZmqMessage::from(topic);
        msg.push_back(payload_bytes.to_vec().into());

        let frames: Vec<_> = msg.iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), topic.as_bytes());
        assert_eq!(frames[1].as_ref(), payload_bytes);
    }

    #[tokio::test]
    async fn direct_pub_sub_roundtrip() {
        // Direct PUB/SUB without broker: publisher binds, subscriber connects.
        let transport = Transport::tcp("127.0.0.1", 15700);

        let publisher = ZmqPublisher::bind(&transport).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let subscriber = ZmqSubscriber::connect(&transport).await.unwrap();
        subscriber.subscribe("kairos.test").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let envelope = Envelope::new("kairos.test.hello", &"world".to_string()).unwrap();
        let correlation_id = envelope.correlation_id;
        publisher.publish(envelope).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), subscriber.recv())
            .await
            .expect("timed out waiting for message")
            .unwrap();

        assert_eq!(received.topic, "kairos.test.hello");
        assert_eq!(received.correlation_id, correlation_id);
        assert_eq!(received.decode::<String>().unwrap(), "world");
    }

    #[tokio::test]
    async fn topic_filtering_works() {
        let transport = Transport::tcp("127.0.0.1", 15701);

        let publisher = ZmqPublisher::bind(&transport).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let subscriber = ZmqSubscriber::connect(&transport).await.unwrap();
        subscriber.subscribe("kairos.admission").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let admitted =
            Envelope::new("kairos.admission.granted", &"admitted payload".to_string()).unwrap();
        let admitted_id = admitted.correlation_id;
        publisher.publish(admitted).await.unwrap();

        let metrics_update =
            Envelope::new("kairos.metrics.tick", &"metrics payload".to_string()).unwrap();
        publisher.publish(metrics_update).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), subscriber.recv())
            .await
            .expect("timed out")
            .unwrap();

        assert_eq!(received.topic, "kairos.admission.granted");
        assert_eq!(received.correlation_id, admitted_id);

        let timeout_result =
            tokio::time::timeout(std::time::Duration::from_millis(300), subscriber.recv()).await;
        assert!(
            timeout_result.is_err(),
            "should not receive filtered message"
        );
    }

    #[tokio::test]
    async fn broker_roundtrip() {
        use crate::broker::{BrokerConfig as BrokerSocketConfig, EventBroker};

        let broker_cfg = BrokerSocketConfig::tcp("127.0.0.1", 15710, 15711, 15712);

        let broker_handle = tokio::spawn({
            let cfg = broker_cfg.clone();
            async move {
                let broker = EventBroker::new(cfg);
                broker.run().await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let frontend_transport = Transport::tcp("127.0.0.1", 15710);
        let publisher = ZmqPublisher::connect(&frontend_transport).await.unwrap();

        let backend_transport = Transport::tcp("127.0.0.1", 15711);
        let subscriber = ZmqSubscriber::connect(&backend_transport).await.unwrap();
        subscriber.subscribe("kairos.").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct AdmissionGranted {
            agent: String,
            predicted_tokens: f64,
        }

        let event = AdmissionGranted {
            agent: "writer".into(),
            predicted_tokens: 512.0,
        };
        let envelope = Envelope::new("kairos.admission.granted", &event).unwrap();
        let correlation_id = envelope.correlation_id;
        publisher.publish(envelope).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(3), subscriber.recv())
            .await
            .expect("timed out waiting for broker-forwarded message")
            .unwrap();

        assert_eq!(received.topic, "kairos.admission.granted");
        assert_eq!(received.correlation_id, correlation_id);

        let decoded: AdmissionGranted = received.decode().unwrap();
        assert_eq!(decoded, event);

        broker_handle.abort();
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_message() {
        // PUB/SUB is fan-out: all subscribers get every matching message.
        let transport = Transport::tcp("127.0.0.1", 15720);

        let publisher = ZmqPublisher::bind(&transport).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let sub1 = ZmqSubscriber::connect(&transport).await.unwrap();
        let sub2 = ZmqSubscriber::connect(&transport).await.unwrap();
        sub1.subscribe("kairos.").await.unwrap();
        sub2.subscribe("kairos.").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let envelope = Envelope::new("kairos.test.fanout", &42u64).unwrap();
        let cid = envelope.correlation_id;
        publisher.publish(envelope).await.unwrap();

        let r1 = tokio::time::timeout(std::time::Duration::from_secs(2), sub1.recv())
            .await
            .expect("sub1 timed out")
            .unwrap();
        let r2 = tokio::time::timeout(std::time::Duration::from_secs(2), sub2.recv())
            .await
            .expect("sub2 timed out")
            .unwrap();

        assert_eq!(r1.correlation_id, cid);
        assert_eq!(r2.correlation_id, cid);
        assert_eq!(r1.decode::<u64>().unwrap(), 42);
        assert_eq!(r2.decode::<u64>().unwrap(), 42);
    }
}
