//! Error types for the retrieval engine.
//!
//! [`FetchError`] covers what can go wrong while obtaining a document from
//! the network; [`Error`] is the terminal error surfaced by the engine.

use thiserror::Error;

/// Failure of a single fetch (after any retries).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure, timeout, non-2xx status or empty body.
    #[error("network error: {message}")]
    Network {
        message: String,
        /// HTTP status code when the server answered with a non-2xx status.
        status: Option<u16>,
    },

    /// Body was not valid UTF-8 or not syntactically valid JSON.
    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network {
            message: message.into(),
            status: None,
        }
    }

    pub fn status(code: u16) -> Self {
        FetchError::Network {
            message: format!("HTTP {code}"),
            status: Some(code),
        }
    }

    pub fn timed_out() -> Self {
        FetchError::network("timed out")
    }
}

/// Terminal error returned by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
    },

    #[error("parse error: {0}")]
    Parse(String),

    /// No usable cache entry, or a durable-storage failure that had to surface.
    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network { message, status } => Error::Network { message, status },
            FetchError::Parse(message) => Error::Parse(message),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
