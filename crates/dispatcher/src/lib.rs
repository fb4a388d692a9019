//! Per-agent dispatcher (spec §4.H): reads one agent's topic and spawns a
//! worker task per `request` message.
//!
//! Built on the same health-ping/graceful-shutdown skeleton as
//! `stupid_eisenbahn::worker::WorkerRunner`, generalized from a
//! single-purpose publisher worker to one that also drives the per-agent
//! recv loop. Health is logged rather than published (the teacher's
//! `WorkerHealth` event/topic has no counterpart in `kairos-transport`,
//! since per-backend health lives in `kairos-metrics` instead).

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kairos_agent::{Agent, TERMINAL_SINK};
use kairos_transport::{Message, MessageHandler, MessageKind};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

pub use error::DispatcherError;

const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Drives one agent's recv loop: every `request` message spawns a concurrent
/// worker task that runs the agent and forwards its result to the
/// agent-returned `next_target`. Ordering between workers is not preserved.
pub struct Dispatcher<A: Agent + 'static> {
    agent: Arc<A>,
    handler: Arc<MessageHandler>,
    balancer_url: String,
    health_interval: Duration,
}

impl<A: Agent + 'static> Dispatcher<A> {
    pub fn new(agent: Arc<A>, handler: Arc<MessageHandler>, balancer_url: impl Into<String>) -> Self {
        Self {
            agent,
            handler,
            balancer_url: balancer_url.into(),
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Runs the recv loop until `shutdown` is notified, then awaits all
    /// in-flight worker tasks before returning.
    #[instrument(skip(self, shutdown), fields(agent = %self.agent.agent_name()))]
    pub async fn run(self, shutdown: Arc<Notify>) -> Result<(), DispatcherError> {
        let agent_name = self.agent.agent_name().to_string();
        info!(agent = %agent_name, "dispatcher starting");

        let health_shutdown = shutdown.clone();
        let health_name = agent_name.clone();
        let health_interval = self.health_interval;
        let health_handle = tokio::spawn(async move {
            health_loop(&health_name, health_interval, &health_shutdown).await;
        });

        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        loop {
            in_flight.retain(|handle| !handle.is_finished());
            tokio::select! {
                received = self.handler.recv() => {
                    match received {
                        Ok(message) => {
                            in_flight.push(self.spawn_worker(message));
                        }
                        Err(err) => {
                            warn!(agent = %agent_name, error = %err, "recv failed, continuing");
                        }
                    }
                }
                _ = shutdown.notified() => break,
            }
        }

        health_handle.abort();
        for handle in in_flight {
            let _ = handle.await;
        }

        info!(agent = %agent_name, "dispatcher stopped");
        Ok(())
    }

    fn spawn_worker(&self, message: Message) -> JoinHandle<()> {
        let agent = self.agent.clone();
        let handler = self.handler.clone();
        let balancer_url = self.balancer_url.clone();

        tokio::spawn(async move {
            match message.msg_type() {
                MessageKind::Request => run_request(agent, handler, balancer_url, message).await,
                MessageKind::Event => {
                    // Legacy per-replica ready-queue path; the balancer alone
                    // gates admission in this runtime, so these are logged
                    // and discarded.
                    info!(msg_id = message.id(), "discarding legacy replica-ready event");
                }
                MessageKind::Flush => {
                    info!(msg_id = message.id(), "flush requested (no-op: sends are synchronous)");
                }
            }
        })
    }
}

async fn run_request(
    agent: Arc<impl Agent + 'static>,
    handler: Arc<MessageHandler>,
    balancer_url: String,
    mut message: Message,
) {
    message.add_action_timing("start_run");

    let msg_id = message.id();
    let agent_name = agent.agent_name().to_string();
    let payload = message
        .origin_data()
        .get("payload")
        .cloned()
        .unwrap_or(Value::Null);
    let metadata = json!({
        "agent_name": agent_name,
        "msg_id": msg_id,
        "start_time": Utc::now(),
    });

    match agent.run(payload, &balancer_url, metadata).await {
        Ok((result, next_target)) => {
            message.add_action_timing("end_run");
            let mut data = message.origin_data().clone();
            data.insert("payload".to_string(), result);
            message.set_origin_data(data);

            if next_target == TERMINAL_SINK {
                info!(msg_id, "message reached terminal sink");
                return;
            }
            if let Err(err) = handler.send(message, &next_target).await {
                error!(msg_id, error = %err, "failed to forward message to next target");
            }
        }
        Err(err) => {
            error!(msg_id, agent = %agent_name, error = %err, "agent run failed");
        }
    }
}

async fn health_loop(agent_name: &str, interval: Duration, shutdown: &Notify) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(agent = %agent_name, "dispatcher healthy");
            }
            _ = shutdown.notified() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kairos_agent::AgentError;
    use kairos_transport::Envelope;
    use kairos_transport::{EventPublisher, EventSubscriber, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Mutex};

    struct ChannelPublisher {
        tx: mpsc::UnboundedSender<Envelope>,
    }

    #[async_trait]
    impl EventPublisher for ChannelPublisher {
        async fn publish(&self, envelope: Envelope) -> Result<(), TransportError> {
            self.tx
                .send(envelope)
                .map_err(|_| TransportError::Transport("channel closed".to_string()))
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
            self.rx
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| TransportError::Transport("channel closed".to_string()))
        }
    }

    struct CountingAgent {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn agent_name(&self) -> &str {
            "counter"
        }

        async fn run_impl(
            &self,
            input_data: Value,
            _balancer_url: &str,
            _metadata: Value,
        ) -> Result<(Value, String), AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((input_data, TERMINAL_SINK.to_string()))
        }
    }

    async fn looped_handler() -> (Arc<MessageHandler>, mpsc::UnboundedSender<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = Arc::new(ChannelPublisher { tx: tx.clone() });
        let subscriber = Arc::new(ChannelSubscriber { rx: Mutex::new(rx) });
        let handler = MessageHandler::initialize(publisher, subscriber, "counter")
            .await
            .unwrap();
        (Arc::new(handler), tx)
    }

    #[tokio::test]
    async fn request_message_runs_agent_and_reaches_sink() {
        let (handler, tx) = looped_handler().await;
        let agent = Arc::new(CountingAgent { calls: AtomicUsize::new(0) });

        let message = Message::new(1, "counter", MessageKind::Request);
        let envelope = Envelope::new("counter", &message).unwrap();
        tx.send(envelope).unwrap();

        let received = handler.recv().await.unwrap();
        run_request(agent.clone(), handler.clone(), "http://balancer".to_string(), received).await;

        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatcher_stops_on_shutdown_notify() {
        let (handler, _tx) = looped_handler().await;
        let agent = Arc::new(CountingAgent { calls: AtomicUsize::new(0) });
        let dispatcher = Dispatcher::new(agent, handler, "http://balancer")
            .health_interval(Duration::from_millis(20));

        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(async move { dispatcher.run(shutdown_clone).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher should stop promptly")
            .unwrap();
        assert!(result.is_ok());
    }
}
