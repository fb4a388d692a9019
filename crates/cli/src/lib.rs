pub mod agent;

pub use agent::PassthroughAgent;
