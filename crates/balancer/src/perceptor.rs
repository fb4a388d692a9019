//! Memory Perceptor (spec §4.D) — forward-projected KV-cache occupancy per backend.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// One admitted request's footprint within the interval map.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub msg_id: i64,
    pub prompt_length: f64,
    pub predicted_time: f64,
    /// The first Δ-slot this request was registered into. Tokens accrue
    /// linearly at `Decode_slope` per second from this slot onward.
    start_slot: i64,
}

struct PerceptorState {
    /// slot index (⌊t/Δ⌋) → requests occupying that slot.
    intervals: HashMap<i64, Vec<AdmissionRequest>>,
    /// msg_id → the slot indices it was registered into.
    index: HashMap<i64, Vec<i64>>,
    bias_tokens: f64,
}

/// Per-backend admission model. `try_add`/`remove` are the only mutators;
/// both are guarded by one `Mutex` so a failed trial never leaves partial
/// state behind.
pub struct MemoryPerceptor {
    delta: f64,
    max_tokens: f64,
    decode_slope: f64,
    bias_factor: f64,
    state: Mutex<PerceptorState>,
}

fn now_unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

/// Tokens accumulated by `req` by the time slot `slot` ends: its prompt
/// footprint plus whatever decode has produced since its own start slot.
fn cumulative_memory(req: &AdmissionRequest, slot: i64, decode_per_slot: f64) -> f64 {
    let elapsed_slots = (slot - req.start_slot).max(0) as f64;
    req.prompt_length + decode_per_slot * elapsed_slots
}

impl MemoryPerceptor {
    pub fn new(delta: f64, max_tokens: f64, decode_slope: f64, bias_factor: f64) -> Self {
        Self {
            delta,
            max_tokens,
            decode_slope,
            bias_factor,
            state: Mutex::new(PerceptorState {
                intervals: HashMap::new(),
                index: HashMap::new(),
                bias_tokens: 0.0,
            }),
        }
    }

    /// Constant decode rate per slot. A `k`-dependent curve (concurrency
    /// scaling) would be plugged in here; the design keeps it constant.
    fn slope(&self, _k: usize) -> f64 {
        self.decode_slope
    }

    /// Hypothetically registers the request into every Δ-slot between
    /// `ceil(now/Δ)` and `now + predicted_time`. Admits and commits if no
    /// touched slot would exceed `MAX_TOKENS`; otherwise leaves state
    /// untouched and returns `None`.
    #[instrument(skip(self), fields(msg_id))]
    pub async fn try_add(
        &self,
        msg_id: i64,
        prompt_length: f64,
        predicted_time: f64,
    ) -> Option<f64> {
        let mut guard = self.state.lock().await;

        let now = now_unix_seconds();
        let start_slot = (now / self.delta).ceil() as i64;
        let end_time = now + predicted_time;

        let mut touched = Vec::new();
        let mut slot = start_slot;
        while (slot as f64) * self.delta < end_time {
            touched.push(slot);
            slot += 1;
        }

        // Copy-on-commit: clone only the slots this trial touches.
        let mut trial: HashMap<i64, Vec<AdmissionRequest>> = HashMap::new();
        for &s in &touched {
            trial.insert(s, guard.intervals.get(&s).cloned().unwrap_or_default());
        }

        let request = AdmissionRequest {
            msg_id,
            prompt_length,
            predicted_time,
            start_slot,
        };

        let mut pred_max_tokens = 0.0_f64;

        for &s in &touched {
            let bucket = trial.get_mut(&s).expect("slot inserted above");
            bucket.push(request.clone());

            let decode_per_slot = self.slope(bucket.len()) * self.delta;
            let slot_total: f64 = bucket
                .iter()
                .map(|r| cumulative_memory(r, s, decode_per_slot))
                .sum::<f64>()
                + guard.bias_tokens;

            pred_max_tokens = pred_max_tokens.max(slot_total);

            if slot_total > self.max_tokens {
                debug!(msg_id, slot = s, slot_total, "trial rejected, overflow");
                return None;
            }
        }

        for (s, bucket) in trial {
            guard.intervals.insert(s, bucket);
        }
        guard.index.insert(msg_id, touched);

        debug!(msg_id, pred_max_tokens, "trial committed");
        Some(pred_max_tokens)
    }

    /// Removes the request from every slot it occupies. No-op on an unknown id.
    pub async fn remove(&self, msg_id: i64) {
        let mut guard = self.state.lock().await;
        let Some(slots) = guard.index.remove(&msg_id) else {
            return;
        };
        for s in slots {
            if let Some(bucket) = guard.intervals.get_mut(&s) {
                bucket.retain(|r| r.msg_id != msg_id);
                if bucket.is_empty() {
                    guard.intervals.remove(&s);
                }
            }
        }
    }

    /// Reads the current backend GPU cache usage fraction and updates the
    /// asymmetric-EWMA `bias_tokens` against the current slot's predicted
    /// occupancy.
    pub async fn calibrate_bias(&self, gpu_cache_usage: f64) {
        let mut guard = self.state.lock().await;

        let now = now_unix_seconds();
        let slot = (now / self.delta).floor() as i64;

        let predicted_tokens: f64 = guard
            .intervals
            .get(&slot)
            .map(|bucket| {
                let decode_per_slot = self.slope(bucket.len()) * self.delta;
                bucket
                    .iter()
                    .map(|r| cumulative_memory(r, slot, decode_per_slot))
                    .sum()
            })
            .unwrap_or(0.0);

        let real_tokens = gpu_cache_usage * self.max_tokens;
        let drift = real_tokens - predicted_tokens;
        guard.bias_tokens = if drift > 0.0 {
            drift * self.bias_factor
        } else {
            drift * (2.0 - self.bias_factor)
        };
    }

    /// Snapshot of the current `bias_tokens`, for diagnostics/tests.
    pub async fn bias_tokens(&self) -> f64 {
        self.state.lock().await.bias_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_add_admits_within_budget() {
        let perceptor = MemoryPerceptor::new(0.1, 1000.0, 10.0, 1.0);
        let result = perceptor.try_add(1, 50.0, 0.2).await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn try_add_rejects_over_budget_leaves_state_unchanged() {
        let perceptor = MemoryPerceptor::new(0.1, 10.0, 10.0, 1.0);
        let first = perceptor.try_add(1, 5.0, 0.2).await;
        assert!(first.is_some());

        let second = perceptor.try_add(2, 50.0, 0.2).await;
        assert!(second.is_none());

        // The rejected trial must not have registered request 2.
        perceptor.remove(2).await;
        let still_there = perceptor.try_add(3, 4.0, 0.1).await;
        assert!(still_there.is_some());
    }

    #[tokio::test]
    async fn remove_is_idempotent_on_unknown_id() {
        let perceptor = MemoryPerceptor::new(0.1, 1000.0, 10.0, 1.0);
        perceptor.remove(999).await;
    }

    #[tokio::test]
    async fn remove_frees_capacity_for_later_admission() {
        let perceptor = MemoryPerceptor::new(0.1, 100.0, 10.0, 1.0);
        let first = perceptor.try_add(1, 90.0, 0.1).await;
        assert!(first.is_some());

        let blocked = perceptor.try_add(2, 90.0, 0.1).await;
        assert!(blocked.is_none());

        perceptor.remove(1).await;
        let admitted_after_removal = perceptor.try_add(3, 90.0, 0.1).await;
        assert!(admitted_after_removal.is_some());
    }

    #[tokio::test]
    async fn calibrate_bias_grows_conservative_when_underpredicted() {
        let perceptor = MemoryPerceptor::new(0.1, 1000.0, 10.0, 1.0);
        perceptor.try_add(1, 10.0, 0.5).await;
        perceptor.calibrate_bias(0.9).await;
        // real_tokens (900) far exceeds the tiny predicted occupancy, so
        // bias_tokens should end up positive (more conservative admission).
        assert!(perceptor.bias_tokens().await > 0.0);
    }
}
