//! Controller (spec §4.J): starts dispatcher tasks and the balancer server
//! in order, and tears them down together.
//!
//! Grounded on `original_source/framework/controller/controller_v2.py::ControllerV2`
//! (`launch_all_dispatchers_with_agent`/`launch_balancer`/`stop_all`), adapted
//! from OS-process supervision (`multiprocessing.Process`) to
//! `tokio::task::JoinHandle` supervision over a shared `Arc<Notify>` shutdown
//! signal — the teacher's `crates/eisenbahn/src/worker.rs::WorkerRunner`
//! idiom scaled up from one worker to a whole fleet. Backend engine process
//! supervision is explicitly out of scope (spec §1): the controller only
//! records the `model → serving_type → [url]` map handed to it by
//! configuration.

pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use kairos_agent::Agent;
use kairos_balancer::{build_router, spawn_dispatch_loop, AppState, PerceptorManager};
use kairos_core::FabricConfig;
use kairos_dispatcher::Dispatcher;
use kairos_metrics::MetricsManager;
use kairos_tokens::TokenCounter;
use kairos_transport::{MessageHandler, Transport, ZmqPublisher, ZmqSubscriber};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

pub use error::ControllerError;

/// One agent bound into the workflow: its name, its implementation, and the
/// names of the peer agents (or `"__sink__"`) it may route to.
pub struct AgentBinding {
    pub name: String,
    pub agent: Arc<dyn Agent>,
    pub routes_to: Vec<String>,
}

/// Orchestrates one fabric deployment: dispatcher tasks (one per agent) plus
/// the balancer HTTP server, all sharing a single shutdown signal.
pub struct Controller {
    config: Arc<FabricConfig>,
    llm_urls: HashMap<String, HashMap<String, Vec<String>>>,
    agents_use_model: HashMap<String, String>,
    metrics: Arc<MetricsManager>,
    token_counter: Arc<TokenCounter>,
    shutdown: Arc<Notify>,
}

impl Controller {
    pub fn new(
        config: Arc<FabricConfig>,
        llm_urls: HashMap<String, HashMap<String, Vec<String>>>,
        agents_use_model: HashMap<String, String>,
        token_counter: Arc<TokenCounter>,
    ) -> Self {
        info!(
            backends = llm_urls.values().map(|m| m.values().map(Vec::len).sum::<usize>()).sum::<usize>(),
            "recording engine url map (engine process supervision out of scope)"
        );
        Self {
            config,
            llm_urls,
            agents_use_model,
            metrics: Arc::new(MetricsManager::new()),
            token_counter,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Starts one dispatcher task for `binding`, wiring its message handler
    /// to the broker and mapping each of its `routes_to` peers to their own
    /// topic (one topic per agent name, by convention).
    pub async fn spawn_dispatcher(
        &self,
        binding: AgentBinding,
        balancer_url: impl Into<String>,
    ) -> Result<JoinHandle<()>, ControllerError> {
        let (front_host, front_port) = self.config.transport.frontend_host_port();
        let (back_host, back_port) = self.config.transport.backend_host_port();

        let publisher = Arc::new(ZmqPublisher::connect(&Transport::tcp(front_host, front_port)).await?);
        let subscriber = Arc::new(ZmqSubscriber::connect(&Transport::tcp(back_host, back_port)).await?);
        let handler = Arc::new(MessageHandler::initialize(publisher, subscriber, binding.name.clone()).await?);

        for peer in &binding.routes_to {
            handler.add_target_mapping(peer, peer).await;
        }

        info!(agent = %binding.name, "starting dispatcher");
        let dispatcher = Dispatcher::new(binding.agent, handler, balancer_url.into());
        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            if let Err(err) = dispatcher.run(shutdown).await {
                tracing::error!(error = %err, "dispatcher exited with error");
            }
        }))
    }

    /// Starts the balancer's dispatch loop and HTTP server, registering a
    /// perceptor per backend URL named in the `"normal"` serving type.
    pub async fn spawn_balancer(&self) -> Result<JoinHandle<()>, ControllerError> {
        let mut manager = PerceptorManager::new(self.metrics.clone());
        let admission = &self.config.admission;
        let delta = std::time::Duration::from_secs_f64(admission.delta_seconds);

        for serving_types in self.llm_urls.values() {
            if let Some(urls) = serving_types.get("normal") {
                for url in urls {
                    self.metrics
                        .register(url.clone(), std::time::Duration::from_secs_f64(admission.metrics_interval_seconds))
                        .await;
                    manager.register(
                        url.clone(),
                        admission.delta_seconds,
                        admission.max_tokens,
                        admission.decode_slope,
                        admission.bias_factor,
                    );
                }
            }
        }

        let manager = Arc::new(manager);

        let state = Arc::new(AppState {
            config: self.config.clone(),
            llm_urls: self.llm_urls.clone(),
            agents_use_model: self.agents_use_model.clone(),
            token_counter: self.token_counter.clone(),
            perceptor_manager: manager.clone(),
            queue: Arc::new(kairos_balancer::PriorityQueue::new()),
            client: reqwest::Client::new(),
        });

        let router = build_router(state.clone());
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "balancer listening");

        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            let dispatch_handle = spawn_dispatch_loop(state);
            let calibration_shutdown = shutdown.clone();
            let calibration_handle =
                spawn_bias_calibration_loop(manager, metrics, delta, calibration_shutdown);

            let serve_shutdown = shutdown.clone();
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { serve_shutdown.notified().await })
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "balancer server exited with error");
            }
            dispatch_handle.abort();
            calibration_handle.abort();
        }))
    }

    /// Signals shutdown and awaits every supervised task.
    pub async fn stop_all(&self, handles: Vec<JoinHandle<()>>) {
        info!("stopping all processes");
        self.shutdown.notify_waiters();
        for handle in handles {
            let _ = handle.await;
        }
        info!("all processes terminated");
    }
}

/// Sidecar task (spec §4.D): every `interval`, reads each registered
/// backend's current `gpu_cache_usage` and feeds it to that backend's
/// perceptor, so `bias_tokens` tracks real occupancy drift instead of
/// staying pinned at zero for the life of the process.
fn spawn_bias_calibration_loop(
    manager: Arc<PerceptorManager>,
    metrics: Arc<MetricsManager>,
    interval: std::time::Duration,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for url in manager.backend_urls().cloned().collect::<Vec<_>>() {
                        let Some(perceptor) = manager.perceptor(&url) else { continue };
                        if let Some(snapshot) = metrics.snapshot(&url).await {
                            perceptor.calibrate_bias(snapshot.gpu_cache_usage).await;
                        }
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_records_llm_urls_without_launching_engines() {
        let config = Arc::new(FabricConfig::for_profile(""));
        let mut llm_urls = HashMap::new();
        let mut serving_types = HashMap::new();
        serving_types.insert("normal".to_string(), vec!["http://127.0.0.1:8000/generate".to_string()]);
        llm_urls.insert("llama".to_string(), serving_types);

        let token_counter = Arc::new(TokenCounter::new(HashMap::new(), "/tmp/kairos-controller-test.csv"));
        let controller = Controller::new(config, llm_urls.clone(), HashMap::new(), token_counter);

        assert_eq!(controller.llm_urls, llm_urls);
    }
}
