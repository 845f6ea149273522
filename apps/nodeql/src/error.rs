//! # Application Errors
//!
//! Everything the binary can fail with. Core errors pass through unchanged
//! inside [`AppError::Client`].

use nodeql_core::{ClientError, QueryBuildError, SchemaError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid configuration file or environment override.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// Malformed command line value the parser could not reject itself.
    #[error("Invalid argument: {0}")]
    Argument(String),
}

impl From<SchemaError> for AppError {
    fn from(err: SchemaError) -> Self {
        Self::Client(err.into())
    }
}

impl From<QueryBuildError> for AppError {
    fn from(err: QueryBuildError) -> Self {
        Self::Client(err.into())
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        Self::Client(err.into())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
