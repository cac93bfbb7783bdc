//! Error types for the WebRTC RPC transport

/// Result type alias using the transport Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or renegotiating a connection
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine setup failed (codecs, interceptors, API construction)
    #[error("Engine construction failed: {0}")]
    EngineConstruction(String),

    /// An encoded session description could not be decoded.
    ///
    /// Never retry on this error: the same input will fail the same way.
    #[error("Malformed session description: {0}")]
    MalformedDescription(String),

    /// A wire candidate could not be converted into an engine candidate
    #[error("Malformed ICE candidate: {0}")]
    MalformedCandidate(String),

    /// Offer/answer production or application failed
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Data channel creation or send failed
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// The establishing context was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// The establishing context's deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Operation attempted on a connection that has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if re-dialing with a fresh establisher may succeed.
    ///
    /// Nothing in this crate retries on its own; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Cancelled
                | Error::DeadlineExceeded
                | Error::PeerConnectionError(_)
                | Error::DataChannelError(_)
        )
    }

    /// Check if this error came from decoding an inbound message
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedDescription(_) | Error::MalformedCandidate(_)
        )
    }

    /// Check if this error is a context cancellation or deadline expiry
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}
