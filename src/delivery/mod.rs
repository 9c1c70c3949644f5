pub mod handler;
pub mod queue;
pub mod record;

pub use handler::DeliveryHandler;
pub use queue::{DeliveryQueue, DeliveryTask, FailedDelivery, QueueConfig};
pub use record::{LogDetails, LogRecord};
