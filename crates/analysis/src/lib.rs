//! Background profiling (spec §4.K/§4.L): offline analysis run over
//! collected workflow traces, separate from the online dispatch path.

pub mod priority;
pub mod workflow;

pub use priority::{
    agent_wasserstein_mds_sort, convert_result, mean_predicted_times, priority_table_from_ranking,
    rank_agents, PriorityResult,
};
pub use workflow::{EdgePattern, WorkflowAnalyzer, WorkflowLogEntry};
