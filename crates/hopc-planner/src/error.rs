use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Well-formed YAML that does not describe a valid DAG.
    #[error("Invalid DAG description: {0}")]
    Dsl(String),

    #[error(transparent)]
    Core(#[from] hopc_core::error::Error),
}
