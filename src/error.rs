use thiserror::Error;

use crate::sql::ValueKind;

pub type BoxDynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid executor configuration, reported by the setter that received it.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connectivity, SQL or driver failure.
    #[error("Database operation failed: {0}")]
    Database(#[source] BoxDynError),

    /// No wire type is mapped for the parameter's value kind and the executor
    /// is configured to reject such parameters.
    #[error("Unsupported parameter type {kind} at position {index}")]
    UnsupportedParameterType { index: usize, kind: ValueKind },

    #[error("No driver found for '{0}'")]
    DriverNotFound(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn database(err: impl Into<BoxDynError>) -> Self {
        Error::Database(err.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
