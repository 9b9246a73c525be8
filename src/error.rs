use crate::directory::DirectoryError;
use crate::store::StoreError;

/// Failure classes of the reconciliation engine.
///
/// Missing books and series are not errors: the cascade treats them as a
/// legitimate skip and the upsert treats them as "create new".
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected before any I/O.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Record store failure, including unrecoverable write conflicts.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Directory gateway failure. Always fatal to the enclosing
    /// operation: a local write must never proceed past a failed
    /// external one.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
