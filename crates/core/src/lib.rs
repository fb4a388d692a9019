pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    load_dotenv, AdmissionConfig, FabricConfig, ServerConfig, ServiceDefinition, TransportConfig,
    WorkflowConfig,
};
pub use error::CoreError;
pub use logging::init_tracing;
