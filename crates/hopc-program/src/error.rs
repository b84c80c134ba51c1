use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Program that no DAG can be built from: undefined variables or
    /// functions, wrong argument counts, calls left in expressions.
    #[error("Invalid program: {0}")]
    Program(String),

    #[error(transparent)]
    Core(#[from] hopc_core::error::Error),
}
