pub mod broker;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod pubsub;
pub mod traits;
pub mod transport;
pub mod workflow_message;

pub use envelope::Envelope;
pub use error::TransportError;
pub use handler::MessageHandler;
pub use pubsub::{ZmqPublisher, ZmqSubscriber};
pub use traits::{EventPublisher, EventSubscriber};
pub use transport::Transport;
pub use workflow_message::{ActionTiming, Message, MessageKind};
