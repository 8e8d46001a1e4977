//! Error types for pool construction and invocation

/// Errors from building pools (configuration problems, raised at startup).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{pool} pool has no usable entries")]
    EmptyPool { pool: String },
}

/// Result alias for pool construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal outcome of an invocation that did not produce a payload.
///
/// Transient failures and rotations never surface here; they are handled
/// inside the invoker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// Every credential (and every route per credential) was tried
    #[error("all credentials exhausted")]
    Exhausted,

    /// Upstream rejected the request on its merits; detail is verbatim
    #[error("upstream rejected request: {0}")]
    Fatal(String),

    /// Caller cancelled before a result was obtained
    #[error("invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            InvocationError::Exhausted => "exhausted",
            InvocationError::Fatal(_) => "fatal",
            InvocationError::Cancelled => "cancelled",
        }
    }
}
