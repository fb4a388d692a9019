//! Perceptor Manager (spec §4.E) — cross-replica placement selection.

use std::collections::HashMap;
use std::sync::Arc;

use kairos_metrics::MetricsManager;

use crate::perceptor::MemoryPerceptor;

/// Outcome of a placement attempt.
#[derive(Debug, Clone)]
pub enum Placement {
    Admitted {
        backend_url: String,
        pred_max_tokens: f64,
    },
    Deferred,
}

/// Owns one [`MemoryPerceptor`] per backend URL and picks the least-pressure
/// backend among those willing to admit a request.
pub struct PerceptorManager {
    perceptors: HashMap<String, Arc<MemoryPerceptor>>,
    metrics: Arc<MetricsManager>,
}

impl PerceptorManager {
    pub fn new(metrics: Arc<MetricsManager>) -> Self {
        Self {
            perceptors: HashMap::new(),
            metrics,
        }
    }

    /// Registers a backend, constructing its perceptor. Call during startup
    /// before the manager is shared behind an `Arc`.
    pub fn register(
        &mut self,
        backend_url: impl Into<String>,
        delta: f64,
        max_tokens: f64,
        decode_slope: f64,
        bias_factor: f64,
    ) {
        self.perceptors.insert(
            backend_url.into(),
            Arc::new(MemoryPerceptor::new(delta, max_tokens, decode_slope, bias_factor)),
        );
    }

    pub fn perceptor(&self, backend_url: &str) -> Option<&Arc<MemoryPerceptor>> {
        self.perceptors.get(backend_url)
    }

    pub fn backend_urls(&self) -> impl Iterator<Item = &String> {
        self.perceptors.keys()
    }

    /// Tries every candidate URL, skipping backends currently reporting
    /// `waiting = true`. Keeps the admitting backend with the smallest
    /// `pred_max_tokens`, rolling back the others.
    pub async fn try_add(
        &self,
        urls: &[String],
        msg_id: i64,
        prompt_len: f64,
        predicted_time: f64,
    ) -> Placement {
        let mut admitted: Vec<(String, f64)> = Vec::new();

        for url in urls {
            if let Some(snapshot) = self.metrics.snapshot(url).await {
                if snapshot.waiting {
                    continue;
                }
            }
            let Some(perceptor) = self.perceptors.get(url) else {
                continue;
            };
            if let Some(pred_max_tokens) = perceptor.try_add(msg_id, prompt_len, predicted_time).await {
                admitted.push((url.clone(), pred_max_tokens));
            }
        }

        if admitted.is_empty() {
            return Placement::Deferred;
        }

        admitted.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (selected_url, pred_max_tokens) = admitted[0].clone();

        for (url, _) in &admitted[1..] {
            self.remove(msg_id, url).await;
        }

        Placement::Admitted {
            backend_url: selected_url,
            pred_max_tokens,
        }
    }

    pub async fn remove(&self, msg_id: i64, backend_url: &str) {
        if let Some(perceptor) = self.perceptors.get(backend_url) {
            perceptor.remove(msg_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn try_add_picks_least_pressure_backend() {
        let metrics = Arc::new(MetricsManager::new());
        metrics.register("http://a", Duration::from_secs(60)).await;
        metrics.register("http://b", Duration::from_secs(60)).await;

        let mut manager = PerceptorManager::new(metrics);
        manager.register("http://a", 0.1, 1000.0, 10.0, 1.0);
        manager.register("http://b", 0.1, 1000.0, 10.0, 1.0);

        // Pre-load backend "a" with a large request so it has higher pressure.
        manager
            .perceptor("http://a")
            .unwrap()
            .try_add(99, 900.0, 0.2)
            .await;

        let urls = vec!["http://a".to_string(), "http://b".to_string()];
        let placement = manager.try_add(&urls, 1, 10.0, 0.1).await;

        match placement {
            Placement::Admitted { backend_url, .. } => assert_eq!(backend_url, "http://b"),
            Placement::Deferred => panic!("expected admission"),
        }
    }

    #[tokio::test]
    async fn try_add_defers_when_all_backends_overflow() {
        let metrics = Arc::new(MetricsManager::new());
        metrics.register("http://a", Duration::from_secs(60)).await;

        let mut manager = PerceptorManager::new(metrics);
        manager.register("http://a", 0.1, 10.0, 10.0, 1.0);

        let urls = vec!["http://a".to_string()];
        let placement = manager.try_add(&urls, 1, 1000.0, 0.5).await;
        assert!(matches!(placement, Placement::Deferred));
    }
}
