pub mod config;
pub mod error;
mod queue;

pub use broccoli_queue::brokers::broker::BrokerMessage;
pub use config::QueueConfig;
pub use error::MqError;
pub use queue::IngestQueue;
