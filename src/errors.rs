//! Error types shared across the SDK
//!
//! Every failure surfaces as a typed [`Error`]; the crate never exits the
//! process or panics on user input.

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error during model building or document transcoding
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid user-supplied model configuration or an unsupported schema
    /// construct. Always fatal at model-build time: no partial model is
    /// usable.
    #[error("schema configuration error: {0}")]
    SchemaConfig(String),

    /// Input XML does not conform to the schema. Raised before any tree
    /// construction when validation is requested; aborts only the current
    /// document.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unparseable XML syntax. Aborts the current document unless
    /// best-effort recovery was requested.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Programming-error class: an operation violated a model invariant
    /// (e.g. adding a multi-relation with max occurrences of one).
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// IO error while reading schema or document files
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that abort a single document but leave the model
    /// (and other documents in a batch) usable.
    pub fn is_document_scoped(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::MalformedInput(_))
    }
}
