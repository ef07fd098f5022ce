use thiserror::Error;

use crate::diagnostics::Diagnostics;

/// Failures that are not tied to a template location.
///
/// Template problems travel as [`Diagnostics`]; this enum covers the engine plumbing
/// around them (configuration files, lookups by name) and wraps diagnostics when they
/// cross the [`crate::engine::Engine`] facade.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("{0}")]
    Diagnostics(#[from] Diagnostics),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    /// Returns the wrapped diagnostics, if this error carries any.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Error::Diagnostics(diags) => Some(diags),
            _ => None,
        }
    }
}
