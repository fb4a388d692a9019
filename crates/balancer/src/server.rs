//! Balancer HTTP server (spec §4.G) — `GET /health`, `POST /generate`.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tracing::warn;

use kairos_tokens::TokenRecord;

use crate::queue::QueueEntry;
use crate::state::AppState;

/// Builds the balancer's route table, following the teacher's
/// `build_router(state) -> Router` + CORS-layer idiom, trimmed to this
/// fabric's two routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Mirrors the source's "errors are data, not status codes" contract: every
/// failure path returns HTTP 200 with an `{"error": ...}` body.
async fn generate(State(state): State<Arc<AppState>>, Json(mut body): Json<Value>) -> Json<Value> {
    let Some(body_obj) = body.as_object_mut() else {
        return Json(json!({ "error": "request body must be a JSON object" }));
    };
    let Some(metadata) = body_obj.remove("metadata") else {
        return Json(json!({ "error": "missing metadata" }));
    };

    let Some(msg_id) = metadata.get("msg_id").and_then(Value::as_i64) else {
        return Json(json!({ "error": "metadata.msg_id must be an integer" }));
    };
    let Some(agent_name) = metadata.get("agent_name").and_then(Value::as_str) else {
        return Json(json!({ "error": "metadata.agent_name must be a string" }));
    };
    let agent_name = agent_name.to_string();

    let prompt = body_obj.get("prompt").and_then(Value::as_str).unwrap_or("");
    let prompt_len = match state.token_counter.count_tokens(&agent_name, prompt).await {
        Ok(len) => len as f64,
        Err(err) => return Json(json!({ "error": err.to_string() })),
    };

    let priority = state.config.admission.priority_for(&agent_name);

    let (tx, rx) = oneshot::channel();
    state
        .queue
        .push_back(QueueEntry {
            msg_id,
            agent_name: agent_name.clone(),
            prompt_len,
            priority,
            start_time: Utc::now(),
            completion: tx,
        })
        .await;

    let backend_url = match rx.await {
        Ok(Ok(url)) => url,
        Ok(Err(err)) => return Json(json!({ "error": err.to_string() })),
        Err(_) => return Json(json!({ "error": "dispatch channel closed before placement" })),
    };

    match state.client.post(&backend_url).json(&body).send().await {
        Ok(response) if response.status().is_success() => {
            state.perceptor_manager.remove(msg_id, &backend_url).await;
            let result: Value = match response.json().await {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "failed to parse backend response");
                    return Json(json!({ "error": err.to_string() }));
                }
            };

            if let Some(text) = result
                .get("text")
                .and_then(Value::as_array)
                .and_then(|texts| texts.first())
                .and_then(Value::as_str)
            {
                match state.token_counter.count_tokens(&agent_name, text).await {
                    Ok(generate_text_len) => {
                        let record = TokenRecord {
                            msg_id,
                            agent_name: agent_name.clone(),
                            prompt_len: prompt_len as usize,
                            all_text_len: prompt_len as usize + generate_text_len,
                            generate_text_len,
                        };
                        if let Err(err) = state.token_counter.save_token_info(&record) {
                            warn!(error = %err, "failed to persist token usage record");
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to count generated tokens"),
                }
            }

            Json(result)
        }
        Ok(response) => {
            state.perceptor_manager.remove(msg_id, &backend_url).await;
            let status = response.status();
            let info = response.text().await.unwrap_or_default();
            Json(json!({
                "error": format!("Error during LLM request. error code: {status}, info: {info}")
            }))
        }
        Err(err) => {
            state.perceptor_manager.remove(msg_id, &backend_url).await;
            Json(json!({ "error": format!("Error during LLM request: {err}") }))
        }
    }
}
