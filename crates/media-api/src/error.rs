//! Error types for provider client operations

use key_rotation::InvocationError;

/// Errors from provider client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("script contains no speakable lines")]
    EmptyScript,

    #[error("voice catalog error: {0}")]
    Catalog(String),
}

/// Result alias for provider client operations.
pub type Result<T> = std::result::Result<T, Error>;
