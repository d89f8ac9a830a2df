use thiserror::Error;

pub type ZarrResult<T> = Result<T, ZarrError>;

#[derive(Error, Debug)]
pub enum ZarrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Per-array migration failures
// ---------------------------------------------------------------------------

/// Failure while migrating a single array.
///
/// `Recoverable` means the original array is still intact at its path.
/// `Destructive` means the original was removed and its replacement could
/// not be completed: the data at `path` is gone.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("migration of {path} failed, original left untouched: {source}")]
    Recoverable {
        path: String,
        #[source]
        source: ZarrError,
    },

    #[error("migration of {path} failed after the original was removed: {source}")]
    Destructive {
        path: String,
        #[source]
        source: ZarrError,
    },
}

impl MigrationError {
    pub fn path(&self) -> &str {
        match self {
            MigrationError::Recoverable { path, .. } | MigrationError::Destructive { path, .. } => {
                path
            }
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, MigrationError::Destructive { .. })
    }
}
