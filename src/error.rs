//! Error handling for countstream

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker client error
    #[error("Broker error: {0}")]
    Broker(#[from] rumqttc::ClientError),

    /// Network error (broker unreachable, publish timeout)
    #[error("Network error: {0}")]
    Network(String),
}
