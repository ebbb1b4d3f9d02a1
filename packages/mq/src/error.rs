use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Internal(String),
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Internal(e.to_string())
    }
}

impl From<redis::RedisError> for MqError {
    fn from(e: redis::RedisError) -> Self {
        MqError::Connection(e.to_string())
    }
}
