use thiserror::Error;

/// Errors produced while querying a replica group.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Authoritative negative answer from a backend. Stops retries.
    #[error("data not found")]
    NotFound,

    /// The per-operation deadline elapsed before a backend answered.
    #[error("timed out while fetching data")]
    Timeout,

    #[error("failed to fetch data from group {group}, http status {status}")]
    FailedToFetch { group: String, status: u16 },

    #[error("http request failed: {0}")]
    Http(String),

    #[error("rpc failed: {0}")]
    Rpc(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("limiter error: {0}")]
    Limiter(String),

    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
}

impl BackendError {
    /// Errors that terminate the retry loop: a not-found answer is
    /// authoritative and a blown deadline leaves no time for another attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendError::NotFound | BackendError::Timeout)
    }
}
