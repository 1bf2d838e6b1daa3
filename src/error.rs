use std::error::Error as StdError;

use thiserror::Error;

/// Empath's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Empath's crate-wide error type.
///
/// Every variant is locally recoverable: the pipeline logs it and keeps running. Binaries and
/// tests wrap it in `anyhow` for context.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    /// A resource a path needs to start (e.g. a capture stream) is not available.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// The transcription socket was not open when audio was sent to it.
    #[error("transcription transport not ready: {0}")]
    TransportNotReady(String),

    /// A classifier invocation failed (model, tokenizer or logits decoding).
    #[error("inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
