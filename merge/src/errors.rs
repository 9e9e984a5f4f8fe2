use thiserror::Error;

/// Per-metric merge failures. Never fatal to a response-level merge: the
/// offending pair is logged and skipped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeError {
    #[error("response length mismatch")]
    ResponseLengthMismatch,

    #[error("response start time mismatch")]
    ResponseStartTimeMismatch,
}
