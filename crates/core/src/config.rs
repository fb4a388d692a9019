use std::collections::HashMap;
use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load a `.env` file if present; silently ignored when missing.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_f64(profile: &str, key: &str, default: f64) -> f64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses `"name:value,name:value"` into a map; empty/unset yields `None`.
fn profiled_env_map_f64(profile: &str, key: &str) -> Option<HashMap<String, f64>> {
    let raw = profiled_env_opt(profile, key)?;
    let mut map = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((name, value)) = pair.split_once(':') {
            if let Ok(v) = value.trim().parse::<f64>() {
                map.insert(name.trim().to_string(), v);
            }
        }
    }
    Some(map)
}

/// Process-wide immutable configuration, assembled once at startup from
/// profiled env vars and never reloaded. Every component that needs a static
/// table or interval receives this by `Arc` reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    pub profile: String,
    pub admission: AdmissionConfig,
    pub transport: TransportConfig,
    pub server: ServerConfig,
}

impl FabricConfig {
    pub fn from_env() -> Self {
        let profile = env_or("KAIROS_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            admission: AdmissionConfig::from_env_profiled(p),
            transport: TransportConfig::from_env_profiled(p),
            server: ServerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn log_summary(&self) {
        tracing::info!("FabricConfig loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  admission: max_tokens={} decode_slope={} bias_factor={} delta={}s",
            self.admission.max_tokens,
            self.admission.decode_slope,
            self.admission.bias_factor,
            self.admission.delta_seconds
        );
        tracing::info!(
            "  transport: frontend={} backend={}",
            self.transport.frontend_addr,
            self.transport.backend_addr
        );
        tracing::info!("  server:    bind={}:{}", self.server.host, self.server.port);
    }
}

/// Static admission tables and perceptor parameters (spec §4.D/§6).
///
/// `priority_table`/`predict_time_table` are keyed by agent name. Absent
/// agents fall back to `default_priority`/`default_predicted_time` so a
/// workflow can add agents without a config change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub priority_table: HashMap<String, f64>,
    pub predict_time_table: HashMap<String, f64>,
    pub default_priority: f64,
    pub default_predicted_time: f64,
    pub max_tokens: f64,
    pub decode_slope: f64,
    pub bias_factor: f64,
    pub delta_seconds: f64,
    pub metrics_interval_seconds: f64,
    pub predict_interval_seconds: f64,
}

impl AdmissionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            priority_table: profiled_env_map_f64(p, "PRIORITY_TABLE").unwrap_or_default(),
            predict_time_table: profiled_env_map_f64(p, "PREDICT_TIME_TABLE").unwrap_or_default(),
            default_priority: profiled_env_f64(p, "DEFAULT_PRIORITY", 5.0),
            default_predicted_time: profiled_env_f64(p, "DEFAULT_PREDICTED_TIME", 1.0),
            max_tokens: profiled_env_f64(p, "MAX_TOKENS", 4096.0),
            decode_slope: profiled_env_f64(p, "DECODE_SLOPE", 10.0),
            bias_factor: profiled_env_f64(p, "BIAS_FACTOR", 1.0),
            delta_seconds: profiled_env_f64(p, "DELTA_SECONDS", 0.1),
            metrics_interval_seconds: profiled_env_f64(p, "METRICS_INTERVAL", 0.5),
            predict_interval_seconds: profiled_env_f64(p, "PREDICT_INTERVAL", 0.5),
        }
    }

    pub fn priority_for(&self, agent_name: &str) -> f64 {
        self.priority_table
            .get(agent_name)
            .copied()
            .unwrap_or(self.default_priority)
    }

    pub fn predicted_time_for(&self, agent_name: &str) -> f64 {
        self.predict_time_table
            .get(agent_name)
            .copied()
            .unwrap_or(self.default_predicted_time)
    }
}

/// ZeroMQ broker endpoints (spec §4.A, realized over `kairos-transport`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub frontend_addr: String,
    pub backend_addr: String,
    pub health_addr: String,
}

impl TransportConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            frontend_addr: profiled_env_or(p, "BROKER_FRONTEND", "tcp://127.0.0.1:5559"),
            backend_addr: profiled_env_or(p, "BROKER_BACKEND", "tcp://127.0.0.1:5560"),
            health_addr: profiled_env_or(p, "BROKER_HEALTH", "tcp://127.0.0.1:5561"),
        }
    }

    /// Parses a `tcp://host:port` address string into `(host, port)`.
    /// Falls back to `(addr, 0)` if the address is malformed — callers that
    /// connect will surface the real error.
    fn parse_tcp(addr: &str) -> (String, u16) {
        let stripped = addr.strip_prefix("tcp://").unwrap_or(addr);
        match stripped.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
            None => (stripped.to_string(), 0),
        }
    }

    pub fn frontend_host_port(&self) -> (String, u16) {
        Self::parse_tcp(&self.frontend_addr)
    }

    pub fn backend_host_port(&self) -> (String, u16) {
        Self::parse_tcp(&self.backend_addr)
    }

    pub fn health_host_port(&self) -> (String, u16) {
        Self::parse_tcp(&self.health_addr)
    }
}

/// Balancer HTTP server bind address (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8080),
        }
    }
}

/// One named service: its entry agent and the data keys a request must
/// carry (spec §6, "service → (entry_agent, required_request_keys)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub entry_agent_name: String,
    pub request_keys: Vec<String>,
}

/// The workflow definition: known agents, the services they compose into,
/// and the backend URLs each model serves from. Assembled once from a TOML
/// file, mirroring `EisenbahnConfig::from_file`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub services: HashMap<String, ServiceDefinition>,
    /// `model -> serving_type -> [backend url]`.
    #[serde(default)]
    pub llm_urls: HashMap<String, HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub agents_use_model: HashMap<String, String>,
    /// `agent_name -> [downstream target names]` (a target may be
    /// `kairos_agent::TERMINAL_SINK` or the frontend's own topic).
    #[serde(default)]
    pub routes: HashMap<String, Vec<String>>,
}

impl WorkflowConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// The sole service's definition, for the single-service replay entry
    /// point (`kairos-frontend::start_generate`'s contract: "exactly one
    /// service in the workflow").
    pub fn sole_service(&self) -> Result<(&str, &ServiceDefinition), CoreError> {
        if self.services.len() != 1 {
            return Err(CoreError::Config(format!(
                "expected exactly one service in the workflow, found {}",
                self.services.len()
            )));
        }
        let (name, def) = self.services.iter().next().expect("len checked above");
        Ok((name.as_str(), def))
    }
}
