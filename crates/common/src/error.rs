use thiserror::Error;

/// Failure of any call made to a node or to the result retriever.
///
/// Callers treat every variant the same way (the remote side is
/// unreachable or refused); the variants exist for logging.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream closed")]
    Closed,
}
