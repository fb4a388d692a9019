//! Single long-lived dispatch loop (spec §4.G step 3).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::BalancerError;
use crate::manager::Placement;
use crate::state::AppState;

const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_millis(50);
const DEFERRAL_BACKOFF: Duration = Duration::from_millis(100);

/// Spawns the dispatch loop: peeks the priority queue's head, asks the
/// perceptor manager to place it, and either commits the placement or backs
/// off and retries. Head-of-line is intentional — see §9 for why a deferred
/// head is never skipped in favor of a lower-priority request behind it.
pub fn spawn_dispatch_loop(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if state.queue.is_empty().await {
                tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await;
                continue;
            }

            state.queue.sort_by_priority().await;
            let Some(head) = state.queue.peek_front().await else {
                continue;
            };

            if !state.agents_use_model.contains_key(&head.agent_name) {
                warn!(agent = %head.agent_name, "dropping request for unconfigured agent");
                if let Some(entry) = state.queue.pop_front().await {
                    let _ = entry
                        .completion
                        .send(Err(BalancerError::AgentNotConfigured(head.agent_name.clone())));
                }
                continue;
            }

            let urls = state.normal_urls_for_agent(&head.agent_name);
            if urls.is_empty() {
                let model = state
                    .agents_use_model
                    .get(&head.agent_name)
                    .cloned()
                    .unwrap_or_default();
                warn!(agent = %head.agent_name, model = %model, "no backend urls for model, failing request");
                if let Some(entry) = state.queue.pop_front().await {
                    let _ = entry.completion.send(Err(BalancerError::NoBackendForModel(model)));
                }
                continue;
            }

            let predicted_time = state.config.admission.predicted_time_for(&head.agent_name);

            let placement = state
                .perceptor_manager
                .try_add(&urls, head.msg_id, head.prompt_len, predicted_time)
                .await;

            match placement {
                Placement::Admitted { backend_url, .. } => {
                    commit_placement(&state, backend_url).await;
                }
                Placement::Deferred => {
                    tokio::time::sleep(DEFERRAL_BACKOFF).await;
                }
            }
        }
    })
}

#[instrument(skip(state))]
async fn commit_placement(state: &Arc<AppState>, backend_url: String) {
    let Some(entry) = state.queue.pop_front().await else {
        return;
    };
    let head_of_line_wait_ms = (Utc::now() - entry.start_time).num_milliseconds();
    debug!(
        msg_id = entry.msg_id,
        backend = %backend_url,
        head_of_line_wait_ms,
        "placement committed"
    );
    let _ = entry.completion.send(Ok(backend_url));
}
