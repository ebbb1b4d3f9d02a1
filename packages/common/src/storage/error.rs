use thiserror::Error;

/// Errors that can occur during storage-provider operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object was not found on the volume.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The resolved path does not descend from the volume root.
    #[error("path escapes volume root: {0}")]
    PathEscape(String),

    /// An I/O error occurred; the original cause is preserved.
    #[error("storage IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// An object-store request failed; the original cause is preserved.
    #[error("object store error: {detail}")]
    Backend {
        detail: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    pub fn backend<E>(detail: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            detail: detail.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
