//! Per-agent token counting (spec §4.C).
//!
//! Each agent is configured with the model it runs against; the counter
//! caches one tokenizer per distinct model name and counts tokens for a
//! given agent's prompt/generated text against that model's vocabulary.

pub mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

pub use error::TokenError;

/// One row of the persisted token log (spec §6).
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub msg_id: i64,
    pub agent_name: String,
    pub prompt_len: usize,
    pub all_text_len: usize,
    pub generate_text_len: usize,
}

/// Counts tokens per agent, caching one [`CoreBPE`] tokenizer per model.
pub struct TokenCounter {
    agents_use_model: HashMap<String, String>,
    tokenizer_map: RwLock<HashMap<String, Arc<CoreBPE>>>,
    output_path: PathBuf,
}

impl TokenCounter {
    /// `agents_use_model` maps agent name to the model it is served by.
    /// `output_path` is where `save_token_info` appends CSV rows.
    pub fn new(agents_use_model: HashMap<String, String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            agents_use_model,
            tokenizer_map: RwLock::new(HashMap::new()),
            output_path: output_path.into(),
        }
    }

    /// Ensure a tokenizer is loaded for every configured model, so the first
    /// `count_tokens` call for each agent doesn't pay the load cost.
    pub async fn warm_up(&self) -> Result<(), TokenError> {
        let models: Vec<String> = self
            .agents_use_model
            .values()
            .cloned()
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        for model in models {
            self.tokenizer_for(&model).await?;
        }
        Ok(())
    }

    async fn tokenizer_for(&self, model: &str) -> Result<Arc<CoreBPE>, TokenError> {
        if let Some(bpe) = self.tokenizer_map.read().await.get(model) {
            return Ok(bpe.clone());
        }
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|source| {
            TokenError::TokenizerUnavailable {
                model: model.to_string(),
                source,
            }
        })?;
        let bpe = Arc::new(bpe);
        self.tokenizer_map
            .write()
            .await
            .insert(model.to_string(), bpe.clone());
        Ok(bpe)
    }

    /// Count tokens in `text` using the tokenizer for `agent_name`'s model.
    #[instrument(skip(self, text), fields(agent = %agent_name))]
    pub async fn count_tokens(&self, agent_name: &str, text: &str) -> Result<usize, TokenError> {
        let model = self
            .agents_use_model
            .get(agent_name)
            .ok_or_else(|| TokenError::AgentNotConfigured(agent_name.to_string()))?;
        let bpe = self.tokenizer_for(model).await?;
        let count = bpe.encode_with_special_tokens(text).len();
        debug!(model = %model, tokens = count, "counted tokens");
        Ok(count)
    }

    /// Append one record to the CSV token log, creating the file with a
    /// header row if it does not exist yet.
    pub fn save_token_info(&self, record: &TokenRecord) -> Result<(), TokenError> {
        save_record(&self.output_path, record)
    }
}

fn save_record(path: &Path, record: &TokenRecord) -> Result<(), TokenError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let needs_header = !path.exists();

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if needs_header {
        writer.write_record([
            "msg_id",
            "agent_name",
            "prompt_len",
            "all_text_len",
            "generate_text_len",
        ])?;
    }
    writer.write_record([
        record.msg_id.to_string(),
        record.agent_name.clone(),
        record.prompt_len.to_string(),
        record.all_text_len.to_string(),
        record.generate_text_len.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}
