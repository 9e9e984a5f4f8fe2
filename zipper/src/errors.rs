use thiserror::Error;

use backends::errors::BackendError;

/// Errors that can occur while running the zipper service.
#[derive(Error, Debug)]
pub enum ZipperError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build response: {0}")]
    ResponseBuildError(String),
}
