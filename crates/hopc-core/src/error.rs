use thiserror::Error;

/// Canonical result for the compiler crates.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Arity mismatch, operator/backend combination without a lowering path,
    /// invalid append inputs. Indicates a construction bug upstream.
    #[error("Structural error: {0}")]
    Structural(String),

    /// Only raised when every backend has been excluded for an operator.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    /// The fusion pass failed for a DAG; `explain` holds the DAG listing.
    #[error("Optimization failed: {message}\n{explain}")]
    Optimization { message: String, explain: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Kernel compilation failed: {0}")]
    Compile(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn structural(msg: impl Into<String>) -> Self {
        Error::Structural(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
