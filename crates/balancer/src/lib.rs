pub mod dispatch;
pub mod error;
pub mod manager;
pub mod perceptor;
pub mod queue;
pub mod server;
pub mod state;

pub use dispatch::spawn_dispatch_loop;
pub use error::BalancerError;
pub use manager::{Placement, PerceptorManager};
pub use perceptor::MemoryPerceptor;
pub use queue::{PriorityQueue, QueueEntry, QueuePeek};
pub use server::build_router;
pub use state::AppState;
