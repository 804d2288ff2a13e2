//! Error types for the WebRTC → RTMP forwarder

/// Result type alias using the forwarder Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a forwarding session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SDP parse, description apply, answer creation, or a fault trapped
    /// while setting up the peer connection
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// RTP read, UDP dial/write, or RTCP write failure
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Transcoder failed to spawn or could not be prepared
    #[error("Supervision error: {0}")]
    Supervision(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error happened during offer/answer negotiation
    pub fn is_negotiation_error(&self) -> bool {
        matches!(self, Error::Negotiation(_) | Error::Serialization(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if retrying the same request could succeed
    ///
    /// Media-path and I/O failures are transient; a bad offer or a bad
    /// configuration will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Pipeline(_) | Error::Io(_))
    }
}
