use std::time::Duration;

/// Errors reported by the link boundary (the external transport that owns
/// connection establishment and teardown).
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The link is not connected.
    #[error("link is not connected")]
    NotConnected,
    /// The underlying transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure outcomes of one command exchange.
///
/// All variants are recoverable; a failure on one device or one command
/// never affects other devices or commands.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The link was absent or disconnected at send time.
    #[error("link unavailable at send time")]
    LinkUnavailable,
    /// The link rejected the command, or the command was oversized.
    #[error("command rejected: {0}")]
    SendRejected(String),
    /// No complete response frame arrived within the deadline.
    #[error("no complete response within {0:?}")]
    Timeout(Duration),
    /// The link went down while a response was awaited.
    #[error("link lost while awaiting response")]
    LinkLost,
    /// Marker, echo, length or checksum validation failed.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}
