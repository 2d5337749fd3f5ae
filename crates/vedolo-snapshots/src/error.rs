//! Error types shared by the fetch, cache and decode layers

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single request against an upstream source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed; {0}")]
    Http(#[source] reqwest::Error),

    #[error("Upstream returned HTTP {0}")]
    Status(u16),

    #[error("Rate limited; {0}")]
    RateLimited(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("API error; {0}")]
    Api(String),

    #[error("Malformed response; {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::RateLimited(_) | Self::Rpc { .. } => true,
            Self::Api(_) | Self::Malformed(_) => false,
        }
    }

    /// Whether the upstream asked us to slow down
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Status(429))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        // Explorer URLs carry the API key as a query parameter
        let e = e.without_url();
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Http(e)
        }
    }
}

impl From<DecodeError> for SourceError {
    fn from(e: DecodeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// A paginated fetch that could not complete under the `Abort` policy
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Fetch aborted at block {block} page {page}; {source}")]
    Aborted {
        block: u64,
        page: usize,
        #[source]
        source: SourceError,
    },
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to access cache file '{}'; {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache file '{}' is corrupt; {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize cache; {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("Invalid hex payload; {0}")]
    InvalidHex(String),

    #[error("Payload too short for field '{field}': need {needed} bytes, got {len}")]
    TooShort {
        field: &'static str,
        needed: usize,
        len: usize,
    },

    #[error("Field '{0}' not present in layout")]
    MissingField(&'static str),

    #[error("Field '{0}' has a different kind")]
    WrongKind(&'static str),

    #[error("Value of '{0}' does not fit the target type")]
    Overflow(&'static str),
}
