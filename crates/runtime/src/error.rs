use crate::model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid tool identifier: {0:?}")]
    InvalidToolId(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("tool index unavailable: {0}")]
    IndexUnavailable(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
