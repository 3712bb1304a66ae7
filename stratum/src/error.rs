use thiserror::Error;

use platform::client::ClientError;
use platform::graph::GraphError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unrecognized dataset: {0}")]
    Dataset(String),
    #[error("Asset not found: {0}")]
    AssetNotFound(String),
    #[error("Asset already exists: {0}")]
    AssetExists(String),
    #[error("Training data error: {0}")]
    Training(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
