//! Data layer errors

use thiserror::Error;

/// Data layer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Data layer errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {key}")]
    NotFound { key: String },

    #[error("already exists: {key}")]
    Exists { key: String },

    #[error("data for '{name}' does not match its spec: {message}")]
    Mismatch { name: String, message: String },

    #[error("model '{model}' has no input named '{name}'")]
    UnknownInput { model: String, name: String },

    #[error("model '{model}' has no output named '{name}'")]
    UnknownOutput { model: String, name: String },

    #[error("model '{model}' has no parameter named '{name}'")]
    UnknownParameter { model: String, name: String },

    #[error("input '{input}' of model '{model}' is not connected to a dependency")]
    UnsatisfiedInput { model: String, input: String },

    #[error(transparent)]
    Conversion(#[from] smif_convert::Error),

    #[error(transparent)]
    Metadata(#[from] smif_metadata::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error at {path}: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// True for reads that missed, as opposed to malformed data or IO trouble.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
