//! Frontend & trace generator (spec §4.M): the fabric's outer edge. Sends
//! requests in (direct, rate-paced, or CSV-trace-replayed) and receives
//! completed messages back out, persisting their full action-timing trail.
//!
//! Grounded on `original_source/framework/frontend/frontend.py::Frontend`
//! (`recv_messages`/`process_messages`/`start_generate`), adapted from two
//! `threading.Thread`s signalled by a shared `threading.Event` to two
//! `tokio::task`s signalled by a shared `Arc<Notify>` — the same shutdown
//! idiom `kairos-dispatcher` uses. A message reaches the frontend only if
//! some upstream agent names the frontend's own topic as its `next_target`;
//! routing to `kairos_agent::TERMINAL_SINK` drops the message at the
//! dispatcher instead (see `kairos-dispatcher`), so a workflow that wants
//! completion records must route its last hop back to the frontend.

pub mod error;
pub mod oracle;
pub mod trace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use kairos_transport::{Message, MessageHandler};

pub use error::FrontendError;
pub use oracle::{DatasetOracle, StaticDatasetOracle};
pub use trace::RequestGenerator;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
struct RecordedActionTiming {
    action_name: String,
    timestamp: DateTime<Utc>,
}

/// One completed message's persisted record: its full action-timing trail
/// plus the wall-clock duration between `start_time` and `end_time`.
#[derive(Debug, Clone, Serialize)]
struct CompletedMessageRecord {
    msg_id: i64,
    service: String,
    action_timing: Vec<RecordedActionTiming>,
    duration: Option<f64>,
    timestamp: DateTime<Utc>,
}

fn to_record(message: &Message) -> CompletedMessageRecord {
    CompletedMessageRecord {
        msg_id: message.id(),
        service: message.service_name().to_string(),
        action_timing: message
            .action_timing()
            .iter()
            .map(|a| RecordedActionTiming { action_name: a.action_name.clone(), timestamp: a.timestamp })
            .collect(),
        duration: message.duration_seconds(),
        timestamp: Utc::now(),
    }
}

fn load_existing(path: &std::path::Path) -> Result<Vec<CompletedMessageRecord>, FrontendError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

fn persist(path: &std::path::Path, records: &[CompletedMessageRecord]) -> Result<(), FrontendError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Receives completed messages on `handler`'s own topic and periodically
/// persists them, alongside helpers to send requests (directly or via a
/// replayed trace) into the fabric.
pub struct Frontend {
    handler: Arc<MessageHandler>,
    output_path: PathBuf,
    flush_interval: Duration,
}

impl Frontend {
    pub fn new(handler: Arc<MessageHandler>, output_path: impl Into<PathBuf>) -> Self {
        Self { handler, output_path: output_path.into(), flush_interval: DEFAULT_FLUSH_INTERVAL }
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn handler(&self) -> Arc<MessageHandler> {
        self.handler.clone()
    }

    /// Spawns the recv+persist loop. Runs until `shutdown` is notified,
    /// flushing once more before returning.
    pub fn spawn(&self, shutdown: Arc<Notify>) -> JoinHandle<Result<(), FrontendError>> {
        let handler = self.handler.clone();
        let output_path = self.output_path.clone();
        let flush_interval = self.flush_interval;
        tokio::spawn(async move { run_receive_and_persist(handler, output_path, flush_interval, shutdown).await })
    }

    /// Sends a single request directly to `target_agent`, stamping
    /// `start_time` before handing it to the broker.
    pub async fn send_request(
        &self,
        msg_id: i64,
        service_name: &str,
        target_agent: &str,
        data: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(), FrontendError> {
        self.handler.add_target_mapping(target_agent, target_agent).await;

        let mut message = Message::new(msg_id, service_name, kairos_transport::MessageKind::Request);
        message.set_origin_data(data);
        message.set_start_time();
        self.handler.send(message, target_agent).await?;
        info!(msg_id, service = %service_name, target = %target_agent, "sent request");
        Ok(())
    }
}

async fn run_receive_and_persist(
    handler: Arc<MessageHandler>,
    output_path: PathBuf,
    flush_interval: Duration,
    shutdown: Arc<Notify>,
) -> Result<(), FrontendError> {
    info!("frontend receive loop starting");
    let mut records = load_existing(&output_path)?;
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            received = handler.recv() => {
                match received {
                    Ok(mut message) => {
                        message.set_end_time();
                        info!(
                            msg_id = message.id(),
                            service = message.service_name(),
                            duration = ?message.duration_seconds(),
                            "recv completed message"
                        );
                        records.push(to_record(&message));
                    }
                    Err(err) => warn!(error = %err, "recv failed, continuing"),
                }
            }
            _ = ticker.tick() => {
                if !records.is_empty() {
                    persist(&output_path, &records)?;
                    info!(count = records.len(), path = %output_path.display(), "persisted completed messages");
                }
            }
            _ = shutdown.notified() => break,
        }
    }

    if !records.is_empty() {
        persist(&output_path, &records)?;
    }
    info!("frontend receive loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kairos_transport::{Envelope, EventPublisher, EventSubscriber, MessageKind, TransportError};
    use tokio::sync::{mpsc, Mutex};

    struct ChannelPublisher {
        tx: mpsc::UnboundedSender<Envelope>,
    }

    #[async_trait]
    impl EventPublisher for ChannelPublisher {
        async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
            self.tx.send(envelope).map_err(|_| TransportError::Transport("channel closed".to_string()))
        }
    }

    struct ChannelSubscriber {
        rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    }

    #[async_trait]
    impl EventSubscriber for ChannelSubscriber {
        async fn subscribe(&self, _topic_prefix: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&self) -> Result<Envelope, TransportError> {
            self.rx.lock().await.recv().await.ok_or_else(|| TransportError::Transport("channel closed".to_string()))
        }
    }

    async fn looped_handler() -> (Arc<MessageHandler>, mpsc::UnboundedSender<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = Arc::new(ChannelPublisher { tx: tx.clone() });
        let subscriber = Arc::new(ChannelSubscriber { rx: Mutex::new(rx) });
        let handler = MessageHandler::initialize(publisher, subscriber, "frontend").await.unwrap();
        (Arc::new(handler), tx)
    }

    #[tokio::test]
    async fn completed_message_is_persisted_on_shutdown() {
        let (handler, tx) = looped_handler().await;
        let output = tempfile::NamedTempFile::new().unwrap();
        let output_path = output.path().to_path_buf();

        let frontend = Frontend::new(handler, output_path.clone()).flush_interval(Duration::from_secs(60));

        let mut message = Message::new(1, "draft", MessageKind::Request);
        message.set_start_time();
        let envelope = Envelope::new("frontend", &message).unwrap();
        tx.send(envelope).unwrap();

        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let handle = frontend.spawn(shutdown_clone);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();
        handle.await.unwrap().unwrap();

        let persisted = load_existing(&output_path).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].msg_id, 1);
        assert_eq!(persisted[0].service, "draft");
    }

    #[tokio::test]
    async fn send_request_stamps_start_time_and_routes_to_target() {
        let (handler, _tx) = looped_handler().await;
        let output = tempfile::NamedTempFile::new().unwrap();
        let frontend = Frontend::new(handler, output.path());

        let mut data = std::collections::HashMap::new();
        data.insert("topic".to_string(), serde_json::json!("rust"));
        frontend.send_request(7, "draft", "writer", data).await.unwrap();
    }
}
