use thiserror::Error;

/// Errors raised by the chat client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP request failed or the connection dropped.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server refused the request with a JSON error body.
    #[error("{0}")]
    Rejected(String),

    /// The event stream ended without a terminal record.
    #[error("stream ended before a terminal record")]
    Truncated,

    /// Too many records in one turn could not be decoded.
    #[error("{0} malformed stream records")]
    Malformed(usize),

    /// A turn is still in flight.
    #[error("a turn is already in progress")]
    Busy,
}
