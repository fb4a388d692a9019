//! Per-backend metrics polling (spec §4.B).
//!
//! Each [`MetricsPoller`] scrapes a vLLM-style Prometheus `/metrics` endpoint
//! on an interval, keeps a short rolling history of `num_waiting` samples, and
//! derives a `waiting_threshold` from how often the backend had anything
//! queued recently. The balancer uses `waiting` as an admission-time signal
//! (spec §4.G).

pub mod error;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

pub use error::MetricsError;

const HISTORY_LEN: usize = 10;
const THRESHOLD_STEP: f64 = 0.005;

/// A point-in-time scrape of a backend's Prometheus metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackendSnapshot {
    /// GPU KV-cache occupancy fraction, 1.0 == 100%.
    pub gpu_cache_usage: f64,
    pub num_running: f64,
    pub num_waiting: f64,
    pub num_swapped: f64,
    pub time_in_queue_requests_sum: f64,
    /// Derived: `num_waiting > 0` as of the last scrape.
    pub waiting: bool,
    /// Derived: `1 - 0.005 * (count of nonzero samples in the last 10)`.
    pub gpu_cache_usage_threshold: f64,
}

impl BackendSnapshot {
    fn apply_line(&mut self, line: &str) {
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            return;
        };
        let value = value.trim();
        let Ok(value): Result<f64, _> = value.parse() else {
            return;
        };
        match key {
            "vllm:gpu_cache_usage_perc" => self.gpu_cache_usage = value,
            "vllm:num_requests_running" => self.num_running = value,
            "vllm:num_requests_waiting" => self.num_waiting = value,
            "vllm:num_requests_swapped" => self.num_swapped = value,
            "vllm:time_in_queue_requests_sum" => self.time_in_queue_requests_sum = value,
            _ => {}
        }
    }
}

/// Parses a Prometheus text-format scrape into a [`BackendSnapshot`], keeping
/// whatever fields are absent from `prior`.
fn extract_metrics(text: &str, prior: BackendSnapshot) -> BackendSnapshot {
    let mut snapshot = prior;
    for line in text.lines() {
        snapshot.apply_line(line);
    }
    snapshot
}

/// Polls a single backend's `/metrics` endpoint on an interval.
pub struct MetricsPoller {
    url: String,
    client: reqwest::Client,
    interval: Duration,
    snapshot: RwLock<BackendSnapshot>,
    history: RwLock<VecDeque<f64>>,
}

impl MetricsPoller {
    pub fn new(backend_url: impl Into<String>, interval: Duration) -> Self {
        Self {
            url: backend_url.into(),
            client: reqwest::Client::new(),
            interval,
            snapshot: RwLock::new(BackendSnapshot::default()),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    /// The current snapshot (last successful scrape's values).
    pub async fn snapshot(&self) -> BackendSnapshot {
        *self.snapshot.read().await
    }

    /// Scrape once and update the snapshot, history, and threshold.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn poll_once(&self) -> Result<BackendSnapshot, MetricsError> {
        let metrics_url = format!("{}/metrics", self.url.trim_end_matches('/'));
        let response =
            self.client
                .get(&metrics_url)
                .send()
                .await
                .map_err(|source| MetricsError::Request {
                    url: metrics_url.clone(),
                    source,
                })?;
        let text = response
            .text()
            .await
            .map_err(|source| MetricsError::Request {
                url: metrics_url,
                source,
            })?;

        let mut snapshot_guard = self.snapshot.write().await;
        let mut next = extract_metrics(&text, *snapshot_guard);

        let mut history = self.history.write().await;
        history.push_back(next.num_waiting);
        if history.len() > HISTORY_LEN {
            history.pop_front();
        }
        let nonzero = history.iter().filter(|&&n| n != 0.0).count();
        next.gpu_cache_usage_threshold = 1.0 - THRESHOLD_STEP * nonzero as f64;
        next.waiting = next.num_waiting > 0.0;

        *snapshot_guard = next;
        debug!(
            gpu_cache_usage = next.gpu_cache_usage,
            num_waiting = next.num_waiting,
            threshold = next.gpu_cache_usage_threshold,
            "scraped backend metrics"
        );
        Ok(next)
    }

    /// Spawn a background task that polls forever at `interval`, logging
    /// (not propagating) scrape failures — mirrors the source's "never stop
    /// the watch loop on a single bad scrape" behavior.
    pub fn spawn_watch(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.poll_once().await {
                    warn!(url = %self.url, error = %err, "metrics scrape failed");
                }
            }
        })
    }
}

/// Owns one [`MetricsPoller`] per backend URL.
#[derive(Default)]
pub struct MetricsManager {
    pollers: RwLock<std::collections::HashMap<String, Arc<MetricsPoller>>>,
}

impl MetricsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend and start its watch loop, if not already tracked.
    pub async fn register(&self, backend_url: impl Into<String>, interval: Duration) {
        let backend_url = backend_url.into();
        let mut pollers = self.pollers.write().await;
        if pollers.contains_key(&backend_url) {
            return;
        }
        let poller = Arc::new(MetricsPoller::new(backend_url.clone(), interval));
        poller.clone().spawn_watch();
        pollers.insert(backend_url, poller);
    }

    /// Current snapshot for one backend, if registered.
    pub async fn snapshot(&self, backend_url: &str) -> Option<BackendSnapshot> {
        let pollers = self.pollers.read().await;
        match pollers.get(backend_url) {
            Some(poller) => Some(poller.snapshot().await),
            None => None,
        }
    }

    /// Snapshots for every registered backend.
    pub async fn all_snapshots(&self) -> std::collections::HashMap<String, BackendSnapshot> {
        let pollers = self.pollers.read().await;
        let mut out = std::collections::HashMap::with_capacity(pollers.len());
        for (url, poller) in pollers.iter() {
            out.insert(url.clone(), poller.snapshot().await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_metrics_parses_known_lines() {
        let text = "\
vllm:gpu_cache_usage_perc 0.42
vllm:num_requests_running 3
vllm:num_requests_waiting 7
vllm:num_requests_swapped 0
vllm:time_in_queue_requests_sum 12.5
# HELP some_other_metric ignored
some_other_metric 99
";
        let snapshot = extract_metrics(text, BackendSnapshot::default());
        assert_eq!(snapshot.gpu_cache_usage, 0.42);
        assert_eq!(snapshot.num_running, 3.0);
        assert_eq!(snapshot.num_waiting, 7.0);
        assert_eq!(snapshot.num_swapped, 0.0);
        assert_eq!(snapshot.time_in_queue_requests_sum, 12.5);
    }

    #[test]
    fn extract_metrics_keeps_prior_on_malformed_line() {
        let prior = BackendSnapshot {
            num_running: 5.0,
            ..Default::default()
        };
        let snapshot = extract_metrics("vllm:num_requests_running not-a-number\n", prior);
        assert_eq!(snapshot.num_running, 5.0);
    }

    #[tokio::test]
    async fn poller_threshold_tracks_nonzero_history() {
        let poller = MetricsPoller::new("http://unused", Duration::from_secs(1));
        {
            let mut history = poller.history.write().await;
            for v in [1.0, 0.0, 2.0, 0.0, 0.0] {
                history.push_back(v);
            }
        }
        // Simulate what poll_once does with the threshold math, without a
        // live HTTP round trip.
        let history = poller.history.read().await;
        let nonzero = history.iter().filter(|&&n| n != 0.0).count();
        let threshold = 1.0 - THRESHOLD_STEP * nonzero as f64;
        assert_eq!(nonzero, 2);
        assert!((threshold - 0.99).abs() < 1e-9);
    }
}
